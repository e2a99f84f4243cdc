use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use utoipa::{
    ToResponse,
    openapi::{self, ObjectBuilder, RefOr, ResponseBuilder, Type, content},
};

pub const WEBP_CONTENT_TYPE: &str = "image/webp";
pub const OPTIMIZED_CACHE_CONTROL: &str = "public, max-age=86400";
pub const OPTIMIZED_HEADER: &str = "x-optimized";

/// A freshly encoded WebP buffer, never persisted.
pub struct ImageReply {
    data: Vec<u8>,
}

impl ImageReply {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl IntoResponse for ImageReply {
    fn into_response(self) -> Response {
        let len = self.data.len();
        let mut res = Body::from(self.data).into_response();
        let headers = res.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(WEBP_CONTENT_TYPE),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(OPTIMIZED_CACHE_CONTROL),
        );
        headers.insert(OPTIMIZED_HEADER, HeaderValue::from_static("true"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        res
    }
}

impl ToResponse<'static> for ImageReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(openapi::SchemaFormat::KnownFormat(
                openapi::KnownFormat::Binary,
            )))
            .build();
        let content = content::Content::new(Some(object));
        (
            "ImageReply",
            ResponseBuilder::new()
                .description("Optimized WebP image")
                .content(WEBP_CONTENT_TYPE, content)
                .build()
                .into(),
        )
    }
}
