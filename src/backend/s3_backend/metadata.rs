use crate::backend::{ListPage, ObjectMeta};
use chrono::{DateTime, Utc};
use s3::serde_types::{HeadObjectResult, ListBucketResult, Object};

/// S3 reports RFC 3339 in listings and RFC 2822 (HTTP dates) in HEAD.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

pub fn from_object(object: Object) -> ObjectMeta {
    ObjectMeta {
        last_modified: parse_timestamp(&object.last_modified),
        content_type: None,
        etag: object.e_tag,
        size: object.size,
        key: object.key,
    }
}

pub fn from_head(key: &str, head: HeadObjectResult) -> ObjectMeta {
    ObjectMeta {
        key: key.to_owned(),
        size: head.content_length.unwrap_or(0).max(0) as u64,
        last_modified: head.last_modified.as_deref().and_then(parse_timestamp),
        content_type: head.content_type,
        etag: head.e_tag,
    }
}

pub fn from_listing(result: ListBucketResult) -> ListPage {
    let next_continuation = if result.is_truncated {
        result.next_continuation_token
    } else {
        None
    };
    ListPage {
        common_prefixes: result
            .common_prefixes
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.prefix)
            .collect(),
        objects: result.contents.into_iter().map(from_object).collect(),
        next_continuation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_both_timestamp_flavours() {
        let a = parse_timestamp("2021-03-04T05:06:07.000Z").unwrap();
        assert_eq!((a.year(), a.month(), a.day(), a.hour()), (2021, 3, 4, 5));
        let b = parse_timestamp("Thu, 04 Mar 2021 05:06:07 GMT").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
