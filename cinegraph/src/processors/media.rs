use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{SatelliteProcessor, clean, list_items, parse_list};
use crate::batch::{Batch, DocRef};
use crate::collections::{EdgeKind, VertexKind};
use crate::errors::Result;
use crate::source::SourceRow;
use crate::utils::key::{KeyPart, make_key};

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default, rename = "type", alias = "image_type")]
    kind: Option<String>,
    #[serde(default)]
    width: Option<i64>,
    #[serde(default)]
    height: Option<i64>,
    #[serde(default)]
    aspect_ratio: Option<f64>,
    #[serde(default)]
    iso_639_1: Option<String>,
    #[serde(default)]
    vote_average: Option<f64>,
    #[serde(default)]
    vote_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    site: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(default)]
    official: Option<bool>,
    #[serde(default)]
    iso_639_1: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageVertex<'a> {
    pub parent_key: &'a str,
    pub image_type: &'a str,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct VideoVertex<'a> {
    pub parent_key: &'a str,
    pub video_type: &'a str,
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub official: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<&'a str>,
}

/// Grouped image collections and the singular type of their members.
const IMAGE_GROUPS: &[(&str, &str)] = &[
    ("posters", "poster"),
    ("backdrops", "backdrop"),
    ("logos", "logo"),
    ("stills", "still"),
    ("profiles", "profile"),
];

pub struct MediaProcessor;

// Images come either grouped (`{"posters": [..], "backdrops": [..]}`) or as
// one flat array whose items carry `type`.
fn images(raw: Option<Value>) -> Vec<(String, RawImage)> {
    let mut out = Vec::new();
    match raw {
        Some(Value::Object(mut groups)) => {
            for (group, image_type) in IMAGE_GROUPS {
                for item in list_items(groups.remove(*group), &[]) {
                    if let Ok(image) = serde_json::from_value::<RawImage>(item) {
                        out.push((image_type.to_string(), image));
                    }
                }
            }
        }
        Some(items @ Value::Array(_)) => {
            for item in list_items(Some(items), &[]) {
                if let Ok(image) = serde_json::from_value::<RawImage>(item) {
                    let image_type = clean(image.kind.as_deref()).unwrap_or("image").to_lowercase();
                    out.push((image_type, image));
                }
            }
        }
        _ => {}
    }
    out
}

impl MediaProcessor {
    fn add_images(&self, row: &SourceRow, parent: &DocRef, batch: &mut Batch) -> Result<()> {
        for (position, (image_type, image)) in images(row.json("images")).iter().enumerate() {
            let file_path = clean(image.file_path.as_deref());
            let identity = match file_path {
                Some(path) => KeyPart::Text(path),
                None => KeyPart::Int(position as i64),
            };
            let key = make_key(&[parent.key.as_str().into(), image_type.as_str().into(), identity]);
            let vertex = ImageVertex {
                parent_key: &parent.key,
                image_type,
                position,
                file_path,
                width: image.width,
                height: image.height,
                aspect_ratio: image.aspect_ratio,
                language: clean(image.iso_639_1.as_deref()),
                vote_average: image.vote_average,
                vote_count: image.vote_count,
            };
            let target = batch.add_vertex(VertexKind::Image, key, &vertex)?;
            batch.add_edge(
                EdgeKind::HasImage,
                parent,
                &target,
                &[],
                json!({ "image_type": image_type }),
            )?;
        }
        Ok(())
    }

    fn add_videos(&self, row: &SourceRow, parent: &DocRef, batch: &mut Batch) -> Result<()> {
        let videos: Vec<RawVideo> = parse_list(row, "videos", &["results", "videos"]);
        for (position, video) in videos.iter().enumerate() {
            let video_type = clean(video.kind.as_deref()).unwrap_or("video");
            let video_key = clean(video.key.as_deref());
            let identity = match video_key {
                Some(k) => KeyPart::Text(k),
                None => KeyPart::Int(position as i64),
            };
            let key = make_key(&[parent.key.as_str().into(), video_type.into(), identity]);
            let vertex = VideoVertex {
                parent_key: &parent.key,
                video_type,
                position,
                video_key,
                name: clean(video.name.as_deref()),
                site: clean(video.site.as_deref()),
                size: video.size,
                official: video.official,
                language: clean(video.iso_639_1.as_deref()),
                published_at: clean(video.published_at.as_deref()),
            };
            let target = batch.add_vertex(VertexKind::Video, key, &vertex)?;
            batch.add_edge(
                EdgeKind::HasVideo,
                parent,
                &target,
                &[],
                json!({ "video_type": video_type }),
            )?;
        }
        Ok(())
    }
}

impl SatelliteProcessor for MediaProcessor {
    fn name(&self) -> &'static str {
        "media"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["images", "videos"]
    }

    fn process(&self, row: &SourceRow, parent: &DocRef) -> Result<Batch> {
        let mut batch = Batch::new();
        self.add_images(row, parent, &mut batch)?;
        self.add_videos(row, parent, &mut batch)?;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouped_images_are_typed_by_group() {
        let row = SourceRow::from(json!({
            "images": {
                "posters": [{"file_path": "/p1.jpg", "width": 500}],
                "backdrops": [{"file_path": "/b1.jpg"}, {"width": 1}],
            },
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = MediaProcessor.process(&row, &parent).unwrap();
        let images = batch.vertices(VertexKind::Image);
        assert_eq!(images.len(), 3);
        assert_eq!(images[0]["_key"], "the_matrix_603_poster_p1jpg");
        assert_eq!(images[0]["parent_key"], "the_matrix_603");
        assert_eq!(images[2]["_key"], "the_matrix_603_backdrop_2");
        assert_eq!(batch.edges(EdgeKind::HasImage).len(), 3);
    }

    #[test]
    fn flat_images_and_videos() {
        let row = SourceRow::from(json!({
            "images": [{"type": "Poster", "file_path": "/x.png"}],
            "videos": {"results": [{"key": "vKQi3bBA1y8", "type": "Trailer", "site": "YouTube"}]},
        }));
        let parent = DocRef::new(VertexKind::Movie, "the_matrix_603");
        let batch = MediaProcessor.process(&row, &parent).unwrap();
        assert_eq!(batch.vertices(VertexKind::Image)[0]["image_type"], "poster");
        let video = &batch.vertices(VertexKind::Video)[0];
        assert_eq!(video["_key"], "the_matrix_603_trailer_vkqi3bba1y8");
        assert_eq!(video["site"], "YouTube");
    }
}
