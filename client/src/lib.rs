use std::path::Path;

use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_HORIZONTAL_ONLY};
use kernel::{DeleteResult, ErrorBody, ImageList, Stats, UploadResult};
use reqwest::{Client, Response, multipart};
use resource::Resource;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

pub mod resource;

const TABLE_WIDTH: u16 = 120;
const SNIFF_LEN: u64 = 512;
const UNKNOWN_MIME: &str = "application/octet-stream";

pub struct UploadParams {
    pub uri: String,
    pub file: String,
    pub folder: Option<String>,
}

#[derive(Default)]
pub struct ListParams {
    pub uri: String,
    pub folder: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<String>,
}

/// Uploads one local image and prints the stored variants.
pub async fn upload_image(params: UploadParams) {
    let Some(mut resource) = Resource::new(&params.uri) else {
        println!("invalid server uri: {}", params.uri);
        return;
    };
    resource.append_path("upload");

    let form = match image_form(&params.file, params.folder).await {
        Ok(form) => form,
        Err(e) => {
            println!("cannot read {}: {e}", params.file);
            return;
        }
    };

    let client = Client::new();
    let result = client.post(resource.to_string()).multipart(form).send().await;
    match checked(result).await {
        Ok(response) => match response.json::<UploadResult>().await {
            Ok(r) => {
                let mut table = new_table(vec!["Variant", "URL"]);
                table.add_row(vec![Cell::new("original"), Cell::new(&r.url)]);
                table.add_row(vec![Cell::new("thumbnail"), Cell::new(&r.thumbnail)]);
                table.add_row(vec![Cell::new("small"), Cell::new(&r.small)]);
                println!("{table}");
                println!(
                    "{} stored in '{}' as {} ({}x{}, {} bytes)",
                    params.file, r.folder, r.path, r.width, r.height, r.size
                );
            }
            Err(e) => println!("JSON decode error: {e}"),
        },
        Err(e) => println!("upload error: {e}"),
    }
}

/// Prints one page of stored originals.
pub async fn list_images(params: ListParams) {
    let Some(mut resource) = Resource::new(&params.uri) else {
        println!("invalid server uri: {}", params.uri);
        return;
    };
    resource.append_path("api/images");
    if let Some(folder) = &params.folder {
        resource.query("folder", folder);
    }
    if let Some(page) = params.page {
        resource.query("page", &page.to_string());
    }
    if let Some(limit) = params.limit {
        resource.query("limit", &limit.to_string());
    }
    if let Some(sort) = &params.sort {
        resource.query("sort", sort);
    }

    let client = Client::new();
    match checked(client.get(resource.to_string()).send().await).await {
        Ok(response) => match response.json::<ImageList>().await {
            Ok(list) => {
                let mut table = new_table(vec!["Path", "Size", "Dimensions", "Created"]);
                for image in list.images {
                    table.add_row(vec![
                        Cell::new(image.path),
                        Cell::new(image.size).set_alignment(CellAlignment::Right),
                        Cell::new(format!(
                            "{}x{}",
                            image.dimensions.width, image.dimensions.height
                        )),
                        Cell::new(image.created_at),
                    ]);
                }
                println!("{table}");
                let p = list.pagination;
                println!(
                    "page {} of {} ({} images, {} per page)",
                    p.page, p.total_pages, p.total, p.limit
                );
            }
            Err(e) => println!("JSON decode error: {e}"),
        },
        Err(e) => println!("error: {e}"),
    }
}

/// Prints usage statistics of the whole store.
pub async fn show_stats(uri: &str) {
    let Some(mut resource) = Resource::new(uri) else {
        println!("invalid server uri: {uri}");
        return;
    };
    resource.append_path("api/stats");

    let client = Client::new();
    match checked(client.get(resource.to_string()).send().await).await {
        Ok(response) => match response.json::<Stats>().await {
            Ok(stats) => {
                let mut table = new_table(vec!["Folder", "Images", "Size"]);
                for (name, folder) in &stats.folders {
                    table.add_row(vec![
                        Cell::new(name),
                        Cell::new(folder.count).set_alignment(CellAlignment::Right),
                        Cell::new(folder.size).set_alignment(CellAlignment::Right),
                    ]);
                }
                println!("{table}");
                println!(
                    "total: {} images, {} ({} bytes), {} this month",
                    stats.total_images, stats.total_size_human, stats.total_size, stats.this_month
                );
            }
            Err(e) => println!("JSON decode error: {e}"),
        },
        Err(e) => println!("error: {e}"),
    }
}

/// Deletes a stored original with its derivatives.
pub async fn delete_image(uri: &str, path: &str) {
    let Some(mut resource) = Resource::new(uri) else {
        println!("invalid server uri: {uri}");
        return;
    };
    resource.append_path("api/images").append_encoded(path);

    let client = Client::new();
    match checked(client.delete(resource.to_string()).send().await).await {
        Ok(response) => match response.json::<DeleteResult>().await {
            Ok(result) => {
                for deleted in result.deleted {
                    println!("deleted {deleted}");
                }
            }
            Err(e) => println!("JSON decode error: {e}"),
        },
        Err(e) => println!("delete error: {e}"),
    }
}

async fn image_form(file: &str, folder: Option<String>) -> std::io::Result<multipart::Form> {
    let path = Path::new(file);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_owned();

    let mut f = File::open(path).await?;
    let len = f.metadata().await?.len();
    let mime = sniff_mime(&mut f).await?;
    let body = reqwest::Body::wrap_stream(ReaderStream::new(f));
    let part = multipart::Part::stream_with_length(body, len)
        .file_name(file_name)
        .mime_str(mime)
        .map_err(std::io::Error::other)?;

    let form = multipart::Form::new().part("image", part);
    Ok(match folder {
        Some(folder) => form.text("folder", folder),
        None => form,
    })
}

/// Detects the content type from the leading bytes and rewinds the file.
async fn sniff_mime(f: &mut File) -> std::io::Result<&'static str> {
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    (&mut *f).take(SNIFF_LEN).read_to_end(&mut header).await?;
    f.rewind().await?;
    Ok(mime_from_header(&header))
}

fn mime_from_header(header: &[u8]) -> &'static str {
    infer::get(header).map_or(UNKNOWN_MIME, |kind| kind.mime_type())
}

/// Turns transport failures and non 2xx answers into a printable message.
async fn checked(result: reqwest::Result<Response>) -> Result<Response, String> {
    let response = result.map_err(|e| e.to_string())?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(format!("{status} {}: {}", body.code, body.message)),
        Err(_) => Err(status.to_string()),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(TABLE_WIDTH)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}
