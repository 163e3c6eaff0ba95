use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use std::fmt::Write;

/// Properties of one resource in a multistatus response.
#[derive(Debug, Clone, PartialEq)]
pub struct PropEntry {
    pub href: String,
    pub display_name: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl PropEntry {
    pub fn collection(href: String, display_name: &str) -> Self {
        PropEntry {
            href,
            display_name: display_name.to_owned(),
            is_collection: true,
            content_length: None,
            content_type: None,
            last_modified: None,
            etag: None,
        }
    }
}

pub fn http_date(t: &DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn multistatus(entries: &[PropEntry]) -> String {
    let now = Utc::now();
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
    );
    for e in entries {
        // writing into a String never fails
        let _ = write_entry(&mut out, e, &now);
    }
    out.push_str("</D:multistatus>\n");
    out
}

fn write_entry(out: &mut String, e: &PropEntry, now: &DateTime<Utc>) -> std::fmt::Result {
    write!(out, "<D:response><D:href>{}</D:href>", escape(&e.href))?;
    out.push_str("<D:propstat><D:prop>");
    if e.is_collection {
        out.push_str("<D:resourcetype><D:collection/></D:resourcetype>");
    } else {
        out.push_str("<D:resourcetype/>");
    }
    write!(out, "<D:displayname>{}</D:displayname>", escape(&e.display_name))?;
    write!(
        out,
        "<D:getlastmodified>{}</D:getlastmodified>",
        http_date(e.last_modified.as_ref().unwrap_or(now))
    )?;
    if !e.is_collection {
        write!(
            out,
            "<D:getcontentlength>{}</D:getcontentlength>",
            e.content_length.unwrap_or(0)
        )?;
        write!(
            out,
            "<D:getcontenttype>{}</D:getcontenttype>",
            escape(e.content_type.as_deref().unwrap_or("application/octet-stream"))
        )?;
        if let Some(etag) = &e.etag {
            write!(out, "<D:getetag>{}</D:getetag>", escape(etag))?;
        }
    }
    out.push_str("</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_files_and_collections() {
        let t = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        let entries = vec![
            PropEntry::collection("/dav/a%20b/".into(), "a b"),
            PropEntry {
                href: "/dav/a%20b/x&y.txt".into(),
                display_name: "x&y.txt".into(),
                is_collection: false,
                content_length: Some(12),
                content_type: Some("text/plain".into()),
                last_modified: Some(t),
                etag: Some("\"e1\"".into()),
            },
        ];
        let xml = multistatus(&entries);
        assert!(xml.contains("<D:href>/dav/a%20b/</D:href>"));
        assert!(xml.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
        assert!(xml.contains("<D:displayname>x&amp;y.txt</D:displayname>"));
        assert!(xml.contains("<D:getcontentlength>12</D:getcontentlength>"));
        assert!(xml.contains("<D:getlastmodified>Thu, 04 Mar 2021 05:06:07 GMT</D:getlastmodified>"));
        assert!(xml.contains("<D:getetag>&quot;e1&quot;</D:getetag>"));
        assert_eq!(xml.matches("<D:response>").count(), 2);
    }
}
