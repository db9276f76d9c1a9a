use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// One transcoded recording segment, immutable once probed.
///
/// `created_at` comes from the filename timestamp; `None` means the name did
/// not parse, and such a segment is never clustered on a guessed time.
/// `duration` comes from probing the file; a failed probe is recorded as
/// zero, which narrows the join window for the following segment.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    pub local_path: PathBuf,
    pub created_at: Option<NaiveDateTime>,
    pub duration: Duration,
    pub size_bytes: u64,
}

impl MediaSegment {
    pub fn new(
        local_path: PathBuf,
        created_at: Option<NaiveDateTime>,
        duration: Duration,
        size_bytes: u64,
    ) -> Self {
        Self {
            local_path,
            created_at,
            duration,
            size_bytes,
        }
    }

    /// Instant the segment stops covering, when its start is known.
    fn end_time(&self) -> Option<NaiveDateTime> {
        self.created_at.map(|start| start + to_chrono(self.duration))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// A maximal run of segments judged to belong to one continuous recording.
///
/// Segments are ordered by `created_at`; only groups of two or more produce
/// a merged artifact.
#[derive(Debug, Clone)]
pub struct SessionGroup {
    segments: Vec<MediaSegment>,
}

impl SessionGroup {
    fn new(first: MediaSegment) -> Self {
        Self {
            segments: vec![first],
        }
    }

    pub fn segments(&self) -> &[MediaSegment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<MediaSegment> {
        self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Only groups of two or more are ever merged.
    pub fn is_merge_candidate(&self) -> bool {
        self.segments.len() >= 2
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.segments.first().and_then(|s| s.created_at)
    }

    pub fn total_duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }

    /// Output path for the merged artifact: the first member's name with a
    /// `.merged` infix before the extension.
    pub fn merged_output_path(&self) -> PathBuf {
        let first: &Path = &self.segments[0].local_path;
        let stem = first
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("session");
        let ext = first.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        first.with_file_name(format!("{stem}.merged.{ext}"))
    }
}

/// Partition segments into maximal recording sessions.
///
/// Timed segments are sorted by `created_at` and clustered: a segment joins
/// the open group when it starts no later than the previous segment's end
/// plus `gap_tolerance`, otherwise the group is closed and a new one opens.
/// Segments without a parsed timestamp come back as standalone size-1
/// groups after the timed ones.
pub fn group_sessions(segments: Vec<MediaSegment>, gap_tolerance: Duration) -> Vec<SessionGroup> {
    let tolerance = to_chrono(gap_tolerance);

    let (mut timed, untimed): (Vec<_>, Vec<_>) =
        segments.into_iter().partition(|s| s.created_at.is_some());

    timed.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.local_path.cmp(&b.local_path))
    });

    let mut groups: Vec<SessionGroup> = Vec::new();
    let mut current: Option<SessionGroup> = None;

    for segment in timed {
        match current.as_mut() {
            None => current = Some(SessionGroup::new(segment)),
            Some(group) => {
                // Both unwraps are guarded by the partition above.
                let last = group.segments.last().expect("group is never empty");
                let last_end = last.end_time().expect("timed segment has an end");
                let starts_at = segment.created_at.expect("timed segment has a start");

                if starts_at <= last_end + tolerance {
                    group.segments.push(segment);
                } else {
                    debug!(
                        "session break: {} starts {}s past the window",
                        segment.local_path.display(),
                        (starts_at - last_end - tolerance).num_seconds()
                    );
                    groups.push(current.take().expect("current group exists"));
                    current = Some(SessionGroup::new(segment));
                }
            }
        }
    }
    if let Some(group) = current {
        groups.push(group);
    }

    // Unparsable timestamps never merge with anything.
    for segment in untimed {
        groups.push(SessionGroup::new(segment));
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const MIN: u64 = 60;

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 15)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
    }

    fn seg(name: &str, start: Option<NaiveDateTime>, duration_secs: u64) -> MediaSegment {
        MediaSegment::new(
            PathBuf::from(format!("ts/cam1/{name}")),
            start,
            Duration::from_secs(duration_secs),
            1024,
        )
    }

    fn tolerance_mins(mins: u64) -> Duration {
        Duration::from_secs(mins * MIN)
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_sessions(Vec::new(), tolerance_mins(5)).is_empty());
    }

    #[test]
    fn single_segment_passes_through_unmerged() {
        let groups = group_sessions(vec![seg("a.mp4", Some(at(18, 0)), 600)], tolerance_mins(5));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
        assert!(!groups[0].is_merge_candidate());
    }

    #[test]
    fn contiguous_segments_form_one_group() {
        // 18:00 + 30min ends 18:30; next starts 18:32 (2min gap, tol 5min).
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 30 * MIN),
                seg("b.mp4", Some(at(18, 32)), 20 * MIN),
                seg("c.mp4", Some(at(18, 55)), 10 * MIN),
            ],
            tolerance_mins(5),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        assert!(groups[0].is_merge_candidate());
    }

    #[test]
    fn gap_beyond_tolerance_splits_groups() {
        // First ends 18:30; second starts 18:36, over a 5-minute window.
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 30 * MIN),
                seg("b.mp4", Some(at(18, 36)), 10 * MIN),
            ],
            tolerance_mins(5),
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn gap_exactly_at_tolerance_still_joins() {
        // First ends 18:30; second starts 18:35, exactly at the window.
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 30 * MIN),
                seg("b.mp4", Some(at(18, 35)), 10 * MIN),
            ],
            tolerance_mins(5),
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn output_is_a_partition_in_time_order() {
        let input = vec![
            seg("c.mp4", Some(at(20, 0)), 10 * MIN),
            seg("a.mp4", Some(at(18, 0)), 10 * MIN),
            seg("b.mp4", Some(at(18, 11)), 10 * MIN),
            seg("x.mp4", None, 10 * MIN),
        ];
        let groups = group_sessions(input, tolerance_mins(5));

        let mut names: Vec<String> = groups
            .iter()
            .flat_map(|g| g.segments())
            .map(|s| s.local_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 4);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);

        // Within every group, segments ascend by created_at.
        for group in &groups {
            let stamps: Vec<_> = group.segments().iter().filter_map(|s| s.created_at).collect();
            let mut sorted = stamps.clone();
            sorted.sort();
            assert_eq!(stamps, sorted);
        }
    }

    #[test]
    fn adjacent_groups_violate_the_join_window() {
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 10 * MIN),
                seg("b.mp4", Some(at(18, 12)), 10 * MIN),
                seg("c.mp4", Some(at(19, 0)), 10 * MIN),
                seg("d.mp4", Some(at(19, 11)), 10 * MIN),
            ],
            tolerance_mins(5),
        );
        assert_eq!(groups.len(), 2);

        // Maximality: the first segment of each later group starts strictly
        // after the previous group's last end plus the tolerance.
        let tol = chrono::Duration::minutes(5);
        for pair in groups.windows(2) {
            let prev_last = pair[0].segments().last().unwrap();
            let prev_end = prev_last.created_at.unwrap()
                + chrono::Duration::from_std(prev_last.duration).unwrap();
            let next_start = pair[1].segments().first().unwrap().created_at.unwrap();
            assert!(next_start > prev_end + tol);
        }
    }

    #[test]
    fn regrouping_merged_outputs_merges_nothing_further() {
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 10 * MIN),
                seg("b.mp4", Some(at(18, 12)), 10 * MIN),
                seg("c.mp4", Some(at(19, 0)), 10 * MIN),
                seg("d.mp4", Some(at(19, 11)), 10 * MIN),
            ],
            tolerance_mins(5),
        );
        assert_eq!(groups.len(), 2);

        // Treat each merged group as one synthetic segment: created_at of the
        // first member, duration the sum of member durations.
        let merged: Vec<MediaSegment> = groups
            .iter()
            .map(|g| {
                MediaSegment::new(
                    g.merged_output_path(),
                    g.started_at(),
                    g.total_duration(),
                    g.total_size(),
                )
            })
            .collect();

        let regrouped = group_sessions(merged, tolerance_mins(5));
        assert_eq!(regrouped.len(), 2);
        assert!(regrouped.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn unparsable_timestamp_is_standalone_and_never_merged() {
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 10 * MIN),
                seg("noise.mp4", None, 10 * MIN),
                seg("b.mp4", Some(at(18, 11)), 10 * MIN),
            ],
            tolerance_mins(5),
        );

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);

        let standalone = &groups[1];
        assert_eq!(standalone.len(), 1);
        assert!(standalone.started_at().is_none());
        assert!(!standalone.is_merge_candidate());
    }

    #[test]
    fn zero_duration_segment_narrows_the_window() {
        // A zero-duration segment anchors a group but contributes no forward
        // tolerance: the next segment must start within the gap window of the
        // zero-duration segment's own start.
        let tol = tolerance_mins(5);

        // Starts 4 minutes later: inside the window, grouped.
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 0),
                seg("b.mp4", Some(at(18, 4)), 25 * MIN),
            ],
            tol,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);

        // Third segment starts 6 minutes after b's end (18:29): split.
        let groups = group_sessions(
            vec![
                seg("a.mp4", Some(at(18, 0)), 0),
                seg("b.mp4", Some(at(18, 4)), 25 * MIN),
                seg("c.mp4", Some(at(18, 35)), 10 * MIN),
            ],
            tol,
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn merged_output_path_gets_the_infix() {
        let group = group_sessions(
            vec![
                seg("2023-01-15_18-00-00.mp4", Some(at(18, 0)), 10 * MIN),
                seg("2023-01-15_18-11-00.mp4", Some(at(18, 11)), 10 * MIN),
            ],
            tolerance_mins(5),
        )
        .remove(0);

        assert_eq!(
            group.merged_output_path(),
            PathBuf::from("ts/cam1/2023-01-15_18-00-00.merged.mp4")
        );
    }
}
