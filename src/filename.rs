use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors produced while parsing filename-encoded metadata
#[derive(Debug, Error)]
pub enum FilenameError {
    #[error("no file name in path")]
    NoFileName,

    #[error("'{0}' does not match the segment timestamp format")]
    BadSegmentStamp(String),

    #[error("'{0}' does not match the export post format")]
    BadExportPost(String),

    #[error("invalid date/time components in '{0}'")]
    BadComponents(String),
}

/// Recording timestamp encoded in a segment file name.
///
/// The recorder names every segment `YYYY-MM-DD_HH-MM-SS.<ext>`; merged
/// outputs insert a `.merged` infix before the extension. Anything else is
/// rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStamp {
    pub recorded_at: NaiveDateTime,
}

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{2})-(\d{2})_(\d{2})-(\d{2})-(\d{2})(?:\.merged)?\.[A-Za-z0-9]+$")
            .unwrap()
    })
}

impl SegmentStamp {
    /// Parse the recording timestamp out of a segment file name.
    pub fn parse(file_name: &str) -> Result<Self, FilenameError> {
        let caps = segment_re()
            .captures(file_name)
            .ok_or_else(|| FilenameError::BadSegmentStamp(file_name.to_string()))?;

        let num = |i: usize| caps[i].parse::<u32>().unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(caps[1].parse().unwrap(), num(2), num(3))
            .ok_or_else(|| FilenameError::BadComponents(file_name.to_string()))?;
        let time = chrono::NaiveTime::from_hms_opt(num(4), num(5), num(6))
            .ok_or_else(|| FilenameError::BadComponents(file_name.to_string()))?;

        Ok(Self {
            recorded_at: NaiveDateTime::new(date, time),
        })
    }

    /// Parse from a full path, looking only at the final component.
    pub fn parse_path(path: &Path) -> Result<Self, FilenameError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(FilenameError::NoFileName)?;
        Self::parse(name)
    }

    /// The `YYYY-MM-DD` date prefix, as used for catalog dates.
    pub fn date_string(&self) -> String {
        self.recorded_at.format("%Y-%m-%d").to_string()
    }

    /// Human title form, e.g. `15 Jan 2023 18:30:00`.
    pub fn title_string(&self) -> String {
        self.recorded_at.format("%-d %b %Y %H:%M:%S").to_string()
    }
}

/// Metadata encoded in a social-media export file name.
///
/// Export files are named `YYYY-MM-DD_<user> - <postid> <n>_of_<m>...`;
/// `index`/`total` describe the file's position inside a multi-part post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPost {
    pub date: String,
    pub username: String,
    pub post_id: String,
    pub index: u32,
    pub total: u32,
}

fn export_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2})_([^\s]+) - ([^\s]+) (\d+)_of_(\d+)").unwrap()
    })
}

impl ExportPost {
    /// Parse export post metadata out of a file name.
    pub fn parse(file_name: &str) -> Result<Self, FilenameError> {
        let caps = export_re()
            .captures(file_name)
            .ok_or_else(|| FilenameError::BadExportPost(file_name.to_string()))?;

        Ok(Self {
            date: caps[1].to_string(),
            username: caps[2].to_string(),
            post_id: caps[3].to_string(),
            index: caps[4]
                .parse()
                .map_err(|_| FilenameError::BadComponents(file_name.to_string()))?,
            total: caps[5]
                .parse()
                .map_err(|_| FilenameError::BadComponents(file_name.to_string()))?,
        })
    }

    /// Tag name that identifies this post in the catalog.
    pub fn tag_name(&self) -> String {
        format!("{}_{}", self.username, self.post_id)
    }

    /// Movie/gallery name grouping the parts of a multi-part post.
    pub fn collection_name(&self) -> String {
        format!("{} - {}", self.username, self.post_id)
    }

    /// Canonical post URL.
    pub fn post_url(&self) -> String {
        format!("https://www.instagram.com/p/{}/", self.post_id)
    }

    pub fn is_multi_part(&self) -> bool {
        self.total > 1
    }
}
