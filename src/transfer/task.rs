use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::remote::RemoteFile;

/// Suffix marking a download that has not been committed yet.
pub const PART_SUFFIX: &str = ".part";

/// Lifecycle of a single file transfer.
///
/// `Committed` means the local file was renamed from its `.part` name AND the
/// remote copy was scheduled for deletion; `Failed` leaves both the remote
/// file and the partial local file in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Committed,
    Failed,
}

/// One queued file pull and its progress counters.
#[derive(Debug)]
pub struct TransferTask {
    pub remote_file: RemoteFile,
    pub part_path: PathBuf,
    pub final_path: PathBuf,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub started_at: Option<Instant>,
    pub state: TaskState,
}

impl TransferTask {
    pub fn new(remote_file: RemoteFile, final_path: PathBuf) -> Self {
        let part_path = part_path_for(&final_path);
        let total_bytes = remote_file.size;
        Self {
            remote_file,
            part_path,
            final_path,
            bytes_transferred: 0,
            total_bytes,
            started_at: None,
            state: TaskState::Pending,
        }
    }

    /// `folder/name` label used in progress lines.
    pub fn display_name(&self) -> String {
        format!(
            "{}/{}",
            self.remote_file.parent_folder,
            self.remote_file.file_name()
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Committed | TaskState::Failed)
    }
}

/// In-progress download name for a final path: the full file name plus `.part`.
pub fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn remote_file() -> RemoteFile {
        RemoteFile {
            remote_path: "/rec/cam1/2023-01-15_18-30-00.mp4".into(),
            size: 4096,
            modify_time: Utc::now(),
            parent_folder: "cam1".into(),
        }
    }

    #[test]
    fn part_path_appends_suffix_to_full_name() {
        let part = part_path_for(Path::new("ts/cam1/2023-01-15_18-30-00.mp4"));
        assert_eq!(
            part,
            PathBuf::from("ts/cam1/2023-01-15_18-30-00.mp4.part")
        );
    }

    #[test]
    fn new_task_starts_pending_with_listing_size() {
        let task = TransferTask::new(remote_file(), PathBuf::from("ts/cam1/a.mp4"));
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.total_bytes, 4096);
        assert_eq!(task.bytes_transferred, 0);
        assert_eq!(task.part_path, PathBuf::from("ts/cam1/a.mp4.part"));
        assert!(!task.is_terminal());
    }

    #[test]
    fn display_name_is_folder_and_file() {
        let task = TransferTask::new(remote_file(), PathBuf::from("ts/cam1/a.mp4"));
        assert_eq!(task.display_name(), "cam1/2023-01-15_18-30-00.mp4");
    }
}
