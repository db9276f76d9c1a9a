use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::types::*;
use super::CatalogError;
use crate::config::CatalogConfig;

const FIND_SCENES: &str = r#"query FindScenes($filter: FindFilterType, $scene_filter: SceneFilterType) {
  findScenes(filter: $filter, scene_filter: $scene_filter) {
    count
    filesize
    duration
    scenes {
      id
      title
      date
      organized
      files { path size duration }
      paths { screenshot }
      studio { id name }
      tags { id name }
      performers { id name }
      movies { id name }
    }
  }
}"#;

const FIND_IMAGES: &str = r#"query FindImages($filter: FindFilterType) {
  findImages(filter: $filter) {
    count
    images {
      id
      title
      organized
      paths { image thumbnail }
      studio { id name }
      tags { id name }
      performers { id name }
    }
  }
}"#;

const FIND_GALLERIES: &str = r#"query FindGalleries($filter: FindFilterType) {
  findGalleries(filter: $filter) {
    count
    galleries { id title }
  }
}"#;

const FIND_TAGS: &str = r#"query FindTags($filter: FindFilterType) {
  findTags(filter: $filter) {
    count
    tags { id name }
  }
}"#;

const FIND_MOVIES: &str = r#"query FindMovies($filter: FindFilterType) {
  findMovies(filter: $filter) {
    count
    movies { id name date duration }
  }
}"#;

const FIND_PERFORMERS: &str = r#"query FindPerformers($filter: FindFilterType) {
  findPerformers(filter: $filter) {
    count
    performers { id name }
  }
}"#;

const SCENE_UPDATE: &str = r#"mutation SceneUpdate($input: SceneUpdateInput!) {
  sceneUpdate(input: $input) { id }
}"#;

const IMAGE_UPDATE: &str = r#"mutation ImageUpdate($input: ImageUpdateInput!) {
  imageUpdate(input: $input) { id }
}"#;

const TAG_CREATE: &str = r#"mutation TagCreate($input: TagCreateInput!) {
  tagCreate(input: $input) { id name }
}"#;

const TAG_UPDATE: &str = r#"mutation TagUpdate($input: TagUpdateInput!) {
  tagUpdate(input: $input) { id }
}"#;

const MOVIE_CREATE: &str = r#"mutation MovieCreate($input: MovieCreateInput!) {
  movieCreate(input: $input) { id name date duration }
}"#;

const MOVIE_UPDATE: &str = r#"mutation MovieUpdate($input: MovieUpdateInput!) {
  movieUpdate(input: $input) { id }
}"#;

const GALLERY_CREATE: &str = r#"mutation GalleryCreate($input: GalleryCreateInput!) {
  galleryCreate(input: $input) { id title }
}"#;

const ADD_GALLERY_IMAGES: &str = r#"mutation AddGalleryImages($gallery_id: ID!, $image_ids: [ID!]!) {
  addGalleryImages(input: { gallery_id: $gallery_id, image_ids: $image_ids })
}"#;

const METADATA_SCAN: &str = r#"mutation MetadataScan($input: ScanMetadataInput!) {
  metadataScan(input: $input)
}"#;

const METADATA_AUTO_TAG: &str = r#"mutation MetadataAutoTag($input: AutoTagMetadataInput!) {
  metadataAutoTag(input: $input)
}"#;

const JOB_QUEUE: &str = r#"query JobQueue {
  jobQueue { id status subTasks description progress }
}"#;

/// Typed wrapper around the catalog server's GraphQL endpoint.
///
/// Every method is one fire-and-await request; an error return means the
/// operation did not happen and the caller decides whether to skip or retry.
pub struct CatalogClient {
    http: reqwest::Client,
    endpoint: String,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            endpoint: config.endpoint.clone(),
            config,
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    async fn post<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, CatalogError> {
        debug!("catalog request: {}", operation);

        let body = json!({
            "operationName": operation,
            "variables": variables,
            "query": query,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("accept", "*/*")
            .json(&body)
            .send()
            .await
            .map_err(|e| CatalogError::Transport {
                operation,
                source: e,
            })?;

        let text = response.text().await.map_err(|e| CatalogError::Transport {
            operation,
            source: e,
        })?;

        decode_envelope(operation, &text)
    }

    // -- queries ------------------------------------------------------------

    pub async fn find_scenes(
        &self,
        filter: FindFilter,
        scene_filter: serde_json::Value,
    ) -> Result<FindScenesResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findScenes")]
            find_scenes: FindScenesResult,
        }
        let data: Data = self
            .post(
                "FindScenes",
                FIND_SCENES,
                json!({ "filter": filter, "scene_filter": scene_filter }),
            )
            .await?;
        Ok(data.find_scenes)
    }

    pub async fn find_images(&self, filter: FindFilter) -> Result<FindImagesResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findImages")]
            find_images: FindImagesResult,
        }
        let data: Data = self
            .post("FindImages", FIND_IMAGES, json!({ "filter": filter }))
            .await?;
        Ok(data.find_images)
    }

    pub async fn find_galleries(
        &self,
        filter: FindFilter,
    ) -> Result<FindGalleriesResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findGalleries")]
            find_galleries: FindGalleriesResult,
        }
        let data: Data = self
            .post("FindGalleries", FIND_GALLERIES, json!({ "filter": filter }))
            .await?;
        Ok(data.find_galleries)
    }

    pub async fn find_tags(&self, filter: FindFilter) -> Result<FindTagsResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findTags")]
            find_tags: FindTagsResult,
        }
        let data: Data = self
            .post("FindTags", FIND_TAGS, json!({ "filter": filter }))
            .await?;
        Ok(data.find_tags)
    }

    pub async fn find_movies(&self, filter: FindFilter) -> Result<FindMoviesResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findMovies")]
            find_movies: FindMoviesResult,
        }
        let data: Data = self
            .post("FindMovies", FIND_MOVIES, json!({ "filter": filter }))
            .await?;
        Ok(data.find_movies)
    }

    pub async fn find_performers(
        &self,
        filter: FindFilter,
    ) -> Result<FindPerformersResult, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findPerformers")]
            find_performers: FindPerformersResult,
        }
        let data: Data = self
            .post("FindPerformers", FIND_PERFORMERS, json!({ "filter": filter }))
            .await?;
        Ok(data.find_performers)
    }

    /// Single unambiguous performer by name, or None.
    pub async fn find_performer(&self, name: &str) -> Result<Option<Performer>, CatalogError> {
        let result = self.find_performers(FindFilter::with_query(name)).await?;
        if result.count == 1 {
            Ok(result.performers.into_iter().next())
        } else {
            Ok(None)
        }
    }

    // -- mutations ----------------------------------------------------------

    pub async fn update_scene(&self, input: SceneUpdateInput) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "sceneUpdate")]
            scene_update: IdOnly,
        }
        let data: Data = self
            .post(
                "SceneUpdate",
                SCENE_UPDATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.scene_update.id)
    }

    pub async fn update_image(&self, input: ImageUpdateInput) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "imageUpdate")]
            image_update: IdOnly,
        }
        let data: Data = self
            .post(
                "ImageUpdate",
                IMAGE_UPDATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.image_update.id)
    }

    pub async fn create_tag(&self, input: TagCreateInput) -> Result<Tag, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "tagCreate")]
            tag_create: Tag,
        }
        let data: Data = self
            .post(
                "TagCreate",
                TAG_CREATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.tag_create)
    }

    pub async fn update_tag(&self, input: TagUpdateInput) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "tagUpdate")]
            tag_update: IdOnly,
        }
        let data: Data = self
            .post(
                "TagUpdate",
                TAG_UPDATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.tag_update.id)
    }

    pub async fn create_movie(&self, input: MovieCreateInput) -> Result<Movie, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "movieCreate")]
            movie_create: Movie,
        }
        let data: Data = self
            .post(
                "MovieCreate",
                MOVIE_CREATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.movie_create)
    }

    pub async fn update_movie(&self, input: MovieUpdateInput) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "movieUpdate")]
            movie_update: IdOnly,
        }
        let data: Data = self
            .post(
                "MovieUpdate",
                MOVIE_UPDATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.movie_update.id)
    }

    pub async fn create_gallery(&self, input: GalleryCreateInput) -> Result<Gallery, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "galleryCreate")]
            gallery_create: Gallery,
        }
        let data: Data = self
            .post(
                "GalleryCreate",
                GALLERY_CREATE,
                json!({ "input": serde_json::to_value(input).unwrap_or_default() }),
            )
            .await?;
        Ok(data.gallery_create)
    }

    pub async fn add_gallery_images(
        &self,
        gallery_id: &str,
        image_ids: &[String],
    ) -> Result<bool, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "addGalleryImages")]
            added: bool,
        }
        let data: Data = self
            .post(
                "AddGalleryImages",
                ADD_GALLERY_IMAGES,
                json!({ "gallery_id": gallery_id, "image_ids": image_ids }),
            )
            .await?;
        Ok(data.added)
    }

    // -- library maintenance ------------------------------------------------

    /// Ask the server to scan one folder; returns the job id.
    pub async fn scan_folder(&self, folder: &str) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "metadataScan")]
            job_id: String,
        }
        let data: Data = self
            .post(
                "MetadataScan",
                METADATA_SCAN,
                json!({ "input": { "paths": [folder] } }),
            )
            .await?;
        Ok(data.job_id)
    }

    /// Ask the server to auto-tag one folder; returns the job id.
    pub async fn auto_tag(&self, folder: &str) -> Result<String, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "metadataAutoTag")]
            job_id: String,
        }
        let data: Data = self
            .post(
                "MetadataAutoTag",
                METADATA_AUTO_TAG,
                json!({ "input": { "paths": [folder] } }),
            )
            .await?;
        Ok(data.job_id)
    }

    /// Snapshot of the server's background job queue.
    pub async fn job_queue(&self) -> Result<Vec<Job>, CatalogError> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "jobQueue")]
            jobs: Option<Vec<Job>>,
        }
        let data: Data = self.post("JobQueue", JOB_QUEUE, json!({})).await?;
        Ok(data.jobs.unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

/// Split a raw response into data or a logical API failure.
fn decode_envelope<T: DeserializeOwned>(
    operation: &'static str,
    body: &str,
) -> Result<T, CatalogError> {
    #[derive(Deserialize)]
    struct ErrorEntry {
        message: String,
    }

    #[derive(Deserialize)]
    struct Envelope<T> {
        data: Option<T>,
        errors: Option<Vec<ErrorEntry>>,
    }

    let envelope: Envelope<T> =
        serde_json::from_str(body).map_err(|e| CatalogError::Decode {
            operation,
            source: e,
        })?;

    if let Some(errors) = envelope.errors {
        if !errors.is_empty() {
            return Err(CatalogError::Api {
                operation,
                messages: errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }
    }

    envelope.data.ok_or(CatalogError::MissingData { operation })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, Debug)]
    struct ScanData {
        #[serde(rename = "metadataScan")]
        job_id: String,
    }

    #[test]
    fn envelope_with_data_decodes() {
        let body = r#"{"data":{"metadataScan":"17"}}"#;
        let data: ScanData = decode_envelope("MetadataScan", body).unwrap();
        assert_eq!(data.job_id, "17");
    }

    #[test]
    fn envelope_with_errors_is_an_api_failure() {
        let body = r#"{"errors":[{"message":"scene not found"},{"message":"nope"}],"data":null}"#;
        let result: Result<ScanData, _> = decode_envelope("MetadataScan", body);
        match result {
            Err(CatalogError::Api { messages, .. }) => {
                assert!(messages.contains("scene not found"));
                assert!(messages.contains("nope"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_without_data_is_missing_data() {
        let body = r#"{"data":null}"#;
        let result: Result<ScanData, _> = decode_envelope("MetadataScan", body);
        assert!(matches!(result, Err(CatalogError::MissingData { .. })));
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let result: Result<ScanData, _> = decode_envelope("MetadataScan", "<html>504</html>");
        assert!(matches!(result, Err(CatalogError::Decode { .. })));
    }

    #[test]
    fn scenes_envelope_decodes_nested_result() {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "findScenes")]
            find_scenes: FindScenesResult,
        }

        let body = r#"{"data":{"findScenes":{"count":1,"duration":120.5,"filesize":1048576.0,
            "scenes":[{"id":"3","title":"t","date":"2023-01-15","organized":false,
            "files":[{"path":"/lib/a.mp4","size":1048576,"duration":120.5}],
            "paths":{"screenshot":"http://localhost:9999/scene/3/screenshot"},
            "studio":{"id":"2","name":"rec"},"tags":[],"performers":[],"movies":[]}]}}}"#;

        let data: Data = decode_envelope("FindScenes", body).unwrap();
        assert_eq!(data.find_scenes.count, 1);
        assert_eq!(data.find_scenes.scenes[0].files[0].duration, 120.5);
    }
}
