use std::sync::Arc;

use log::info;

use crate::cancel::CancelToken;
use crate::error::{HordeError, Operation};
use crate::transport::{HttpRequest, Transport};

/// Fetches finished images. The image reference is an opaque URL handed out
/// by the service and is requested as-is, without credentials.
pub struct ResultDownloader {
    transport: Arc<dyn Transport>,
}

impl ResultDownloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn download(&self, image_ref: &str, cancel: &CancelToken) -> Result<Vec<u8>, HordeError> {
        cancel.check(Operation::Download)?;
        let response = self
            .transport
            .send(&HttpRequest::get(image_ref))
            .map_err(|err| err.into_horde(Operation::Download))?;
        cancel.check(Operation::Download)?;

        let response = response.expect_status(Operation::Download, 200)?;
        info!("downloaded {} bytes from {image_ref}", response.body.len());
        Ok(response.body)
    }
}
