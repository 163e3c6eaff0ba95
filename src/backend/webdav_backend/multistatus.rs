use crate::backend::{BackendError, BackendResult};
use chrono::{DateTime, Utc};
use quick_xml::{events::Event, Reader};

/// One `<response>` of a PROPFIND multistatus body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResource {
    pub href: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Href,
    Length,
    Type,
    Modified,
    Etag,
}

pub fn parse(body: &str) -> BackendResult<Vec<DavResource>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut result = vec![];
    let mut current: Option<DavResource> = None;
    let mut field = Field::None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| BackendError::Xml(e.to_string()))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => current = Some(DavResource::default()),
                b"href" => field = Field::Href,
                b"getcontentlength" => field = Field::Length,
                b"getcontenttype" => field = Field::Type,
                b"getlastmodified" => field = Field::Modified,
                b"getetag" => field = Field::Etag,
                b"collection" => {
                    if let Some(r) = current.as_mut() {
                        r.is_collection = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(r) = current.as_mut() {
                        r.is_collection = true;
                    }
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| BackendError::Xml(e.to_string()))?;
                if let Some(r) = current.as_mut() {
                    apply(r, field, text.trim());
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(r) = current.take() {
                        result.push(r);
                    }
                }
                field = Field::None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(result)
}

fn apply(r: &mut DavResource, field: Field, text: &str) {
    match field {
        Field::Href => r.href = text.to_owned(),
        Field::Length => r.content_length = text.parse().ok(),
        Field::Type => r.content_type = Some(text.to_owned()),
        Field::Modified => {
            r.last_modified = DateTime::parse_from_rfc2822(text)
                .or_else(|_| DateTime::parse_from_rfc3339(text))
                .map(|t| t.with_timezone(&Utc))
                .ok()
        }
        Field::Etag => r.etag = Some(text.to_owned()),
        Field::None => {}
    }
}
