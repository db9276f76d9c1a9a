use serde::{Deserialize, Serialize};

/// Pagination/search filter shared by all find queries.
///
/// Defaults are explicit here; callers override named fields through the
/// builder methods instead of merging ad-hoc maps.
#[derive(Debug, Clone, Serialize)]
pub struct FindFilter {
    pub q: String,
    pub page: u32,
    pub per_page: u32,
    pub sort: String,
    pub direction: String,
}

impl Default for FindFilter {
    fn default() -> Self {
        Self {
            q: String::new(),
            page: 1,
            per_page: 25,
            sort: "created_at".to_string(),
            direction: "DESC".to_string(),
        }
    }
}

impl FindFilter {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            q: query.into(),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort = sort.into();
        self.direction = direction.into();
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Studio {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performer {
    pub id: String,
    pub name: String,
}

/// File record attached to scenes and images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFileRecord {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenePaths {
    #[serde(default)]
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub organized: bool,
    #[serde(default)]
    pub files: Vec<MediaFileRecord>,
    #[serde(default)]
    pub paths: ScenePaths,
    #[serde(default)]
    pub studio: Option<Studio>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub performers: Vec<Performer>,
    #[serde(default)]
    pub movies: Vec<MovieRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindScenesResult {
    pub count: u32,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub filesize: f64,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePaths {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub organized: bool,
    #[serde(default)]
    pub paths: ImagePaths,
    #[serde(default)]
    pub studio: Option<Studio>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub performers: Vec<Performer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindImagesResult {
    pub count: u32,
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gallery {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindGalleriesResult {
    pub count: u32,
    pub galleries: Vec<Gallery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindTagsResult {
    pub count: u32,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindMoviesResult {
    pub count: u32,
    pub movies: Vec<Movie>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindPerformersResult {
    pub count: u32,
    pub performers: Vec<Performer>,
}

/// Background job as reported by the catalog's queue. Read-only view; the
/// queue itself is owned by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, rename = "subTasks")]
    pub sub_tasks: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Ready,
    Running,
    Finished,
    Stopping,
    Cancelled,
    Failed,
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Mutation inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SceneMovieInput {
    pub movie_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SceneUpdateInput {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movies: Option<Vec<SceneMovieInput>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageUpdateInput {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organized: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagCreateInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagUpdateInput {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<String>>,
    /// Image URL the server should fetch for the tag card
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieCreateInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieUpdateInput {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GalleryCreateInput {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub studio_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performer_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
}
