use client::{ListParams, UploadParams};

pub async fn upload(params: UploadParams) {
    client::upload_image(params).await;
}

pub async fn list(params: ListParams) {
    client::list_images(params).await;
}

pub async fn stats(uri: &str) {
    client::show_stats(uri).await;
}

pub async fn delete(uri: &str, path: &str) {
    client::delete_image(uri, path).await;
}
