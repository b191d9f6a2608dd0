//! REST client for the image service

use async_trait::async_trait;
use serde::Deserialize;

use super::rest::RestClient;
use super::{Image, ImageService, ServiceError};

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Clone)]
pub struct GlanceClient {
    rest: RestClient,
}

impl GlanceClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            rest: RestClient::new(base_url).with_token(token),
        }
    }
}

#[async_trait]
impl ImageService for GlanceClient {
    async fn find_image(&self, ident: &str) -> Result<Image, ServiceError> {
        match self.rest.get::<Image>(&format!("v2/images/{}", ident), &[]).await {
            Ok(image) => Ok(image),
            Err(e) if e.is_not_found() => {
                let mut list: ImageList = self
                    .rest
                    .get("v2/images", &[("name", ident.to_string())])
                    .await?;
                match list.images.len() {
                    0 => Err(ServiceError::not_found("image", ident)),
                    1 => Ok(list.images.remove(0)),
                    count => Err(ServiceError::Ambiguous {
                        kind: "image",
                        ident: ident.to_string(),
                        count,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }
}
