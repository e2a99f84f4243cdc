use std::io::Cursor;
use std::path::PathBuf;

use image::{DynamicImage, ImageFormat, RgbaImage};
use rstest::rstest;
use server::service::{ListQuery, Upload};
use server::{Error, ImageService, Settings};
use test_context::{AsyncTestContext, test_context};
use uuid::Uuid;

struct ServiceContext {
    root: PathBuf,
    service: ImageService,
}

impl AsyncTestContext for ServiceContext {
    async fn setup() -> ServiceContext {
        let root = std::env::temp_dir().join(format!("imgstore_service_{}", Uuid::new_v4()));
        let settings = Settings {
            upload_dir: root.clone(),
            public_url: "http://img.test".to_owned(),
            ..Settings::default()
        };
        ServiceContext {
            root,
            service: ImageService::new(settings),
        }
    }

    async fn teardown(self) {
        tokio::fs::remove_dir_all(self.root)
            .await
            .unwrap_or_default();
    }
}

fn png_upload(width: u32, height: u32, folder: &str) -> Upload {
    let image = RgbaImage::from_pixel(width, height, image::Rgba([10, 200, 30, 255]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    Upload {
        data: buffer.into_inner(),
        content_type: Some("image/png".to_owned()),
        folder: Some(folder.to_owned()),
    }
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn upload_then_delete_round_trip(ctx: &mut ServiceContext) {
    // Arrange
    let uploaded = ctx.service.upload(png_upload(50, 50, "blog")).await.unwrap();

    // Act
    let deleted = ctx.service.delete_image(&uploaded.path).await.unwrap();

    // Assert
    assert_eq!(deleted.deleted.len(), 3);
    let stats = ctx.service.stats().await.unwrap();
    assert_eq!(stats.total_images, 0);
    assert_eq!(stats.total_size, 0);
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn delete_with_missing_derivative_removes_the_rest(ctx: &mut ServiceContext) {
    // Arrange
    let uploaded = ctx.service.upload(png_upload(50, 50, "blog")).await.unwrap();
    let small = uploaded.path.replace(".webp", "-small.webp");
    std::fs::remove_file(ctx.root.join(&small)).unwrap();

    // Act
    let deleted = ctx.service.delete_image(&uploaded.path).await.unwrap();

    // Assert
    assert_eq!(deleted.deleted.len(), 2);
    assert!(!deleted.deleted.contains(&small));
}

#[rstest]
#[case("blog/2026/01/1-abc-thumb.webp")]
#[case("/etc/passwd")]
#[case("blog/../../secret.webp")]
#[case("blog\\2026\\01\\1-abc.webp")]
#[case("blog/2026/01/noextension")]
#[trace]
#[tokio::test]
async fn delete_rejects_bad_paths(#[case] path: &str) {
    // Arrange
    let ctx = ServiceContext::setup().await;

    // Act
    let result = ctx.service.delete_image(path).await;

    // Assert
    assert!(matches!(result, Err(Error::Validation(_))), "{result:?}");
    ctx.teardown().await;
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn delete_unknown_original_is_not_found(ctx: &mut ServiceContext) {
    // Act
    let result = ctx.service.delete_image("blog/2026/01/1-abc123.webp").await;

    // Assert
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn upload_larger_than_limit_is_rejected(ctx: &mut ServiceContext) {
    // Arrange
    let mut upload = png_upload(10, 10, "blog");
    upload.data.resize(ctx.service.settings().max_file_size + 1, 0);

    // Act
    let result = ctx.service.upload(upload).await;

    // Assert
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(!ctx.root.exists());
}

#[tokio::test]
async fn upload_into_unwritable_root_is_storage_error() {
    // Arrange
    let blocker = std::env::temp_dir().join(format!("imgstore_blocker_{}", Uuid::new_v4()));
    std::fs::write(&blocker, b"a file where a directory should be").unwrap();
    let service = ImageService::new(Settings {
        upload_dir: blocker.clone(),
        ..Settings::default()
    });

    // Act
    let result = service.upload(png_upload(10, 10, "blog")).await;

    // Assert
    assert!(matches!(result, Err(Error::Storage { .. })), "{result:?}");
    std::fs::remove_file(blocker).unwrap_or_default();
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn concurrent_deletes_and_listings_do_not_fail(ctx: &mut ServiceContext) {
    // Arrange
    let mut paths = Vec::new();
    for _ in 0..4 {
        paths.push(ctx.service.upload(png_upload(32, 32, "race")).await.unwrap().path);
    }
    let query = ListQuery::default();

    // Act
    let deletes = futures::future::join_all(paths.iter().map(|p| ctx.service.delete_image(p)));
    let listings = futures::future::join_all((0..4).map(|_| ctx.service.list(&query)));
    let (deleted, listed) = tokio::join!(deletes, listings);

    // Assert
    assert!(deleted.iter().all(Result::is_ok));
    assert!(listed.iter().all(Result::is_ok));
    let after = ctx.service.list(&query).await.unwrap();
    assert_eq!(after.pagination.total, 0);
}

#[test_context(ServiceContext)]
#[tokio::test]
async fn list_urls_follow_artifact_naming(ctx: &mut ServiceContext) {
    // Arrange
    let uploaded = ctx.service.upload(png_upload(20, 10, "news")).await.unwrap();

    // Act
    let list = ctx.service.list(&ListQuery::default()).await.unwrap();

    // Assert
    assert_eq!(list.images.len(), 1);
    let item = &list.images[0];
    assert_eq!(item.path, uploaded.path);
    assert_eq!(item.url, uploaded.url);
    assert_eq!(item.thumbnail, uploaded.thumbnail);
    assert_eq!(item.small, uploaded.small);
    assert!(item.created_at.ends_with('Z'));
}

#[rstest]
#[case(Some("0"), None, None)]
#[case(None, Some("0"), None)]
#[case(None, Some("101"), None)]
#[case(None, None, Some("random"))]
#[case(Some("x"), None, None)]
fn list_query_rejects(
    #[case] page: Option<&str>,
    #[case] limit: Option<&str>,
    #[case] sort: Option<&str>,
) {
    // Act
    let result = ListQuery::parse(None, page, limit, sort);

    // Assert
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn list_query_defaults_and_sanitizes() {
    // Act
    let query = ListQuery::parse(Some("../blog"), None, Some(""), Some("name")).unwrap();

    // Assert
    assert_eq!(query.folder.as_deref(), Some("blog"));
    assert_eq!(query.page, 1);
    assert_eq!(query.limit, 20);
    assert_eq!(query.sort, kernel::SortOrder::Name);
}
