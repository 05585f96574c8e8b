//! Stateful fake of the image API on top of wiremock
//!
//! Listing reflects deletes, so pagination behaves like the real service.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TOKEN: &str = "integration-token";

pub struct FakeApi {
    pub server: MockServer,
    images: Arc<Mutex<Vec<Value>>>,
}

struct ListImages {
    images: Arc<Mutex<Vec<Value>>>,
}

impl Respond for ListImages {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let query = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<usize>().ok())
        };
        let page = query("page").unwrap_or(1).max(1);
        let per_page = query("per_page").unwrap_or(20);

        let images = self.images.lock().unwrap();
        let slice: Vec<Value> = images
            .iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .cloned()
            .collect();

        ResponseTemplate::new(200)
            .insert_header("X-Total-Count", images.len().to_string().as_str())
            .set_body_json(Value::Array(slice))
    }
}

struct DeleteImage {
    images: Arc<Mutex<Vec<Value>>>,
}

impl Respond for DeleteImage {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string();

        let mut images = self.images.lock().unwrap();
        let before = images.len();
        images.retain(|image| image["image_id"] != id.as_str());

        if images.len() < before {
            ResponseTemplate::new(200).set_body_json(json!({"image_id": id, "type": "png"}))
        } else {
            ResponseTemplate::new(404)
        }
    }
}

impl FakeApi {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let images = Arc::new(Mutex::new(Vec::new()));

        Mock::given(method("GET"))
            .and(path("/api/images"))
            .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
            .respond_with(ListImages {
                images: images.clone(),
            })
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"^/api/images/[^/]+$"))
            .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
            .respond_with(DeleteImage {
                images: images.clone(),
            })
            .mount(&server)
            .await;

        Self { server, images }
    }

    /// Add an image; `body = None` lists it without a downloadable URL
    pub async fn add_image(
        &self,
        id: &str,
        app: Option<&str>,
        created_at: &str,
        body: Option<&[u8]>,
    ) {
        let url = match body {
            Some(bytes) => {
                let blob_path = format!("/blobs/{}.png", id);
                Mock::given(method("GET"))
                    .and(path(blob_path.as_str()))
                    .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
                    .mount(&self.server)
                    .await;
                format!("{}{}", self.server.uri(), blob_path)
            }
            None => String::new(),
        };

        self.images.lock().unwrap().push(json!({
            "image_id": id,
            "permalink_url": format!("https://gyazo.example/{}", id),
            "url": url,
            "type": "png",
            "created_at": created_at,
            "metadata": {"app": app, "title": null, "url": null, "desc": ""}
        }));
    }

    /// Ids still listed remotely, in listing order
    pub fn remaining_ids(&self) -> Vec<String> {
        self.images
            .lock()
            .unwrap()
            .iter()
            .filter_map(|image| image["image_id"].as_str().map(str::to_string))
            .collect()
    }

    /// Number of requests received with `method` whose path starts with `prefix`
    pub async fn request_count(&self, method: &str, prefix: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == method && r.url.path().starts_with(prefix))
            .count()
    }
}
