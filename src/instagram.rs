use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::{
    CatalogClient, FindFilter, GalleryCreateInput, ImageUpdateInput, MovieCreateInput,
    MovieUpdateInput, SceneMovieInput, SceneUpdateInput, TagCreateInput, TagUpdateInput,
};
use crate::config::Config;
use crate::filename::ExportPost;
use crate::report::Reporter;

/// Counters for one export-linking run.
#[derive(Debug, Default)]
pub struct LinkSummary {
    pub files: usize,
    pub linked: usize,
    pub skipped: usize,
}

/// Link social-media export files to their catalog entries.
///
/// `page` selects one export folder, a comma list of folders, or `*` for all
/// of them; `limit` caps how many files are attempted. Every file failure is
/// a skip; the batch always completes.
pub async fn run_link(
    config: &Config,
    page: &str,
    limit: Option<usize>,
    reporter: &mut Reporter,
) -> Result<LinkSummary> {
    let catalog = CatalogClient::new(config.catalog.clone());

    let mut files = export_files(&config.library.export_dir, page);
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    let mut summary = LinkSummary {
        files: files.len(),
        ..Default::default()
    };

    for (index, file) in files.iter().enumerate() {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let position = format!("[{}/{}]", index + 1, files.len());

        let post = match ExportPost::parse(&file_name) {
            Ok(post) => post,
            Err(e) => {
                warn!("{position} {e}");
                summary.skipped += 1;
                continue;
            }
        };

        let linked = if file_name.ends_with(".mp4") {
            link_video(config, &catalog, &post, &file_name).await
        } else {
            link_image(config, &catalog, &post, &file_name).await
        };

        match linked {
            Ok(true) => {
                summary.linked += 1;
                reporter.success(&format!("{position} updated {file_name}"));
            }
            Ok(false) => {
                summary.skipped += 1;
                reporter.note(&format!("{position} skipped {file_name}"));
            }
            Err(e) => {
                summary.skipped += 1;
                reporter.failure(&format!("{position} failed to update {file_name}: {e}"));
            }
        }
    }

    info!(
        "export linking finished: {}/{} linked",
        summary.linked, summary.files
    );

    Ok(summary)
}

/// Title shared by scenes and images: `user - 2 Apr 2023 1/4 - (postid)`.
fn post_title(post: &ExportPost) -> String {
    let date = chrono::NaiveDate::parse_from_str(&post.date, "%Y-%m-%d")
        .map(|d| d.format("%-d %b %Y").to_string())
        .unwrap_or_else(|_| post.date.clone());
    format!(
        "{} - {} {}/{} - ({})",
        post.username, date, post.index, post.total, post.post_id
    )
}

/// Search query for the media entry: the file name without its extension,
/// with the ` -` separators dropped.
fn media_query(file_name: &str) -> String {
    let stem = file_name
        .trim_end_matches(".mp4")
        .trim_end_matches(".jpg");
    stem.replace(" -", "")
}

/// Find the per-post tag or create it under the configured parent.
async fn resolve_tag(
    config: &Config,
    catalog: &CatalogClient,
    post: &ExportPost,
) -> Option<String> {
    let found = catalog
        .find_tags(FindFilter::with_query(post.tag_name()))
        .await
        .ok()?;

    if found.count == 1 {
        return found.tags.into_iter().next().map(|t| t.id);
    }
    if found.count > 1 {
        warn!("tag {} is ambiguous ({} matches)", post.tag_name(), found.count);
        return None;
    }

    catalog
        .create_tag(TagCreateInput {
            name: post.tag_name(),
            description: Some(format!(
                "Instagram post {} by {}",
                post.post_id, post.username
            )),
            parent_ids: Some(vec![config.catalog.export_parent_tag_id.clone()]),
        })
        .await
        .map(|t| t.id)
        .ok()
}

async fn link_video(
    config: &Config,
    catalog: &CatalogClient,
    post: &ExportPost,
    file_name: &str,
) -> Result<bool> {
    let tag_id = resolve_tag(config, catalog, post).await;

    let found = match catalog
        .find_scenes(
            FindFilter::with_query(media_query(file_name)),
            serde_json::json!({}),
        )
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!("scene lookup failed for {}: {}", file_name, e);
            return Ok(false);
        }
    };

    if found.count != 1 {
        debug!("{} scenes found for {}", found.count, file_name);
        return Ok(false);
    }
    let scene = &found.scenes[0];
    if scene.organized {
        return Ok(false);
    }

    let performer = catalog.find_performer(&post.username).await.unwrap_or(None);

    // Multi-part posts collect their scenes into one movie.
    let mut movie_id: Option<String> = None;
    let mut movie_duration = 0.0;
    if post.is_multi_part() {
        let movies = catalog
            .find_movies(FindFilter::with_query(post.collection_name()))
            .await
            .ok();
        if let Some(existing) = movies.and_then(|m| m.movies.into_iter().next()) {
            movie_duration = existing.duration;
            movie_id = Some(existing.id);
        } else {
            match catalog
                .create_movie(MovieCreateInput {
                    name: post.collection_name(),
                    date: Some(post.date.clone()),
                    url: Some(post.post_url()),
                    studio_id: Some(config.catalog.export_studio_id.clone()),
                    duration: Some(0.0),
                    front_image: scene.paths.screenshot.clone(),
                })
                .await
            {
                Ok(movie) => movie_id = Some(movie.id),
                Err(e) => warn!("movie create failed for {}: {}", post.collection_name(), e),
            }
        }
    }

    if let Some(tag_id) = &tag_id {
        let update = catalog
            .update_tag(TagUpdateInput {
                id: tag_id.clone(),
                name: post.tag_name(),
                description: Some(format!(
                    "Instagram post {} by {}",
                    post.post_id, post.username
                )),
                parent_ids: Some(vec![config.catalog.export_parent_tag_id.clone()]),
                image: scene.paths.screenshot.clone(),
            })
            .await;
        if let Err(e) = update {
            warn!("tag update failed for {}: {}", post.tag_name(), e);
        }
    }

    let mut tag_ids: Vec<String> = Vec::new();
    if let Some(tag_id) = &tag_id {
        tag_ids.push(tag_id.clone());
        tag_ids.extend(scene.tags.iter().map(|t| t.id.clone()));
    }

    let mut movies = Vec::new();
    if let Some(movie_id) = &movie_id {
        movies.push(SceneMovieInput {
            movie_id: movie_id.clone(),
        });
        movies.extend(scene.movies.iter().map(|m| SceneMovieInput {
            movie_id: m.id.clone(),
        }));
    }

    let updated = catalog
        .update_scene(SceneUpdateInput {
            id: scene.id.clone(),
            title: Some(post_title(post)),
            url: Some(post.post_url()),
            date: Some(post.date.clone()),
            studio_id: scene.studio.as_ref().map(|s| s.id.clone()),
            performer_ids: Some(match &performer {
                Some(p) => vec![p.id.clone()],
                None => Vec::new(),
            }),
            tag_ids: Some(tag_ids),
            organized: Some(true),
            movies: Some(movies),
        })
        .await;

    if let Some(movie_id) = &movie_id {
        let scene_duration: f64 = scene.files.iter().map(|f| f.duration).sum();
        let update = catalog
            .update_movie(MovieUpdateInput {
                id: movie_id.clone(),
                name: Some(post.collection_name()),
                date: Some(post.date.clone()),
                url: Some(post.post_url()),
                studio_id: Some(config.catalog.export_studio_id.clone()),
                duration: Some(movie_duration + scene_duration),
            })
            .await;
        if let Err(e) = update {
            warn!("movie update failed for {}: {}", post.collection_name(), e);
        }
    }

    Ok(updated.is_ok())
}

async fn link_image(
    config: &Config,
    catalog: &CatalogClient,
    post: &ExportPost,
    file_name: &str,
) -> Result<bool> {
    let tag_id = resolve_tag(config, catalog, post).await;
    let performer = catalog.find_performer(&post.username).await.unwrap_or(None);

    // Multi-part posts collect their images into one gallery.
    let mut gallery_id: Option<String> = None;
    if post.is_multi_part() {
        let found = catalog
            .find_galleries(FindFilter::with_query(post.collection_name()))
            .await
            .ok();
        match found {
            Some(found) if found.count == 1 => {
                gallery_id = found.galleries.into_iter().next().map(|g| g.id);
            }
            Some(found) if found.count == 0 => {
                match catalog
                    .create_gallery(GalleryCreateInput {
                        title: post.collection_name(),
                        url: Some(post.post_url()),
                        date: Some(post.date.clone()),
                        studio_id: Some(config.catalog.export_studio_id.clone()),
                        performer_ids: Some(match &performer {
                            Some(p) => vec![p.id.clone()],
                            None => Vec::new(),
                        }),
                        tag_ids: Some(tag_id.iter().cloned().collect()),
                    })
                    .await
                {
                    Ok(gallery) => gallery_id = Some(gallery.id),
                    Err(e) => {
                        warn!("gallery create failed for {}: {}", post.collection_name(), e)
                    }
                }
            }
            Some(found) => {
                warn!(
                    "{} galleries found for {}, using none",
                    found.count,
                    post.collection_name()
                );
            }
            None => {}
        }
    }

    let found = match catalog
        .find_images(FindFilter::with_query(media_query(file_name)))
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!("image lookup failed for {}: {}", file_name, e);
            return Ok(false);
        }
    };

    if found.count != 1 {
        debug!("{} images found for {}", found.count, file_name);
        return Ok(false);
    }
    let image = &found.images[0];
    if image.organized {
        return Ok(false);
    }

    if let Some(tag_id) = &tag_id {
        let update = catalog
            .update_tag(TagUpdateInput {
                id: tag_id.clone(),
                name: post.tag_name(),
                description: Some(format!(
                    "Instagram post {} by {}",
                    post.post_id, post.username
                )),
                parent_ids: Some(vec![config.catalog.export_parent_tag_id.clone()]),
                image: image.paths.image.clone(),
            })
            .await;
        if let Err(e) = update {
            warn!("tag update failed for {}: {}", post.tag_name(), e);
        }
    }

    let mut tag_ids: Vec<String> = Vec::new();
    if let Some(tag_id) = &tag_id {
        tag_ids.push(tag_id.clone());
        tag_ids.extend(image.tags.iter().map(|t| t.id.clone()));
    }

    let updated = catalog
        .update_image(ImageUpdateInput {
            id: image.id.clone(),
            title: Some(post_title(post)),
            organized: Some(true),
            studio_id: Some(
                image
                    .studio
                    .as_ref()
                    .map(|s| s.id.clone())
                    .unwrap_or_else(|| config.catalog.export_studio_id.clone()),
            ),
            performer_ids: Some(match &performer {
                Some(p) => vec![p.id.clone()],
                None => Vec::new(),
            }),
            tag_ids: Some(tag_ids),
        })
        .await;

    if let Some(gallery_id) = &gallery_id {
        match catalog
            .add_gallery_images(gallery_id, &[image.id.clone()])
            .await
        {
            Ok(true) => debug!("added image {} to gallery {}", image.id, gallery_id),
            Ok(false) | Err(_) => {
                warn!("could not add image {} to gallery {}", image.id, gallery_id)
            }
        }
    }

    Ok(updated.is_ok())
}

/// Export files selected by the page argument: `*` for every folder, or a
/// comma-separated list of folder names.
fn export_files(export_dir: &Path, page: &str) -> Vec<PathBuf> {
    let folders: Vec<PathBuf> = if page == "*" {
        WalkDir::new(export_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect()
    } else {
        page.split(',')
            .map(|user| export_dir.join(user.trim()))
            .collect()
    };

    let mut files = Vec::new();
    for folder in folders {
        files.extend(
            WalkDir::new(&folder)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path()),
        );
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn post_title_formats_the_date() {
        let post = ExportPost {
            date: "2023-04-02".into(),
            username: "somebody".into(),
            post_id: "Cq1aBcDeFgH".into(),
            index: 1,
            total: 4,
        };
        assert_eq!(post_title(&post), "somebody - 2 Apr 2023 1/4 - (Cq1aBcDeFgH)");
    }

    #[test]
    fn media_query_drops_extension_and_separators() {
        assert_eq!(
            media_query("2023-04-02_somebody - Cq1a 2_of_4.mp4"),
            "2023-04-02_somebody Cq1a 2_of_4"
        );
        assert_eq!(
            media_query("2023-04-02_somebody - Cq1a 2_of_4.jpg"),
            "2023-04-02_somebody Cq1a 2_of_4"
        );
    }

    #[test]
    fn export_files_star_walks_all_folders() {
        let dir = TempDir::new().unwrap();
        for user in ["alpha", "beta"] {
            let folder = dir.path().join(user);
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join(format!("{user}.jpg")), b"x").unwrap();
        }

        assert_eq!(export_files(dir.path(), "*").len(), 2);
        assert_eq!(export_files(dir.path(), "alpha").len(), 1);
        assert_eq!(export_files(dir.path(), "alpha,beta").len(), 2);
        assert_eq!(export_files(dir.path(), "missing").len(), 0);
    }
}
