use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use utoipa::{
    openapi::{
        self, content,
        schema::{KnownFormat, ObjectBuilder, SchemaFormat, Type},
        RefOr, ResponseBuilder,
    },
    ToResponse,
};

/// Stored file sent back as an attachment under its original name.
pub struct FileReply {
    data: Vec<u8>,
    name: String,
    content_type: String,
}

impl FileReply {
    #[must_use]
    pub fn new(data: Vec<u8>, name: String, content_type: String) -> Self {
        Self {
            data,
            name,
            content_type,
        }
    }

    /// Name safe to put between the quotes of a `Content-Disposition` header.
    fn attachment_name(&self) -> String {
        self.name
            .chars()
            .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
            .collect()
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let file_name = self.attachment_name();
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        let len = self.data.len().to_string();
        let mut res = Body::from(self.data).into_response();
        res.headers_mut().insert(header::CONTENT_TYPE, content_type);
        let attachment = format!(r#"attachment; filename="{file_name}""#);
        if let Ok(val) = HeaderValue::from_str(attachment.as_str()) {
            res.headers_mut().insert(header::CONTENT_DISPOSITION, val);
        }
        if let Ok(val) = HeaderValue::from_str(len.as_str()) {
            res.headers_mut().insert(header::CONTENT_LENGTH, val);
        }

        res
    }
}

impl ToResponse<'static> for FileReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Binary)))
            .build();
        let content = content::Content::new(Some(object));
        (
            "FileReply",
            ResponseBuilder::new()
                .description("File binary content")
                .content("application/octet-stream", content)
                .build()
                .into(),
        )
    }
}
