use super::{
    xml::{multistatus, PropEntry},
    DavError, DavInner, RequestContext,
};
use crate::{aggregate::VirtualLevel, backend::listing::DirectoryListing, normalized_path::NormalizedPath};
use hyper::{header, Body, HeaderMap, Request, Response, StatusCode};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Depth {
    Zero,
    One,
    Infinity,
}

pub(super) fn parse_depth(headers: &HeaderMap) -> Result<Depth, DavError> {
    let value = match headers.get("Depth") {
        None => return Ok(Depth::One),
        Some(v) => v
            .to_str()
            .map_err(|_| DavError::BadRequest("invalid Depth header".into()))?
            .trim(),
    };
    match value {
        "0" => Ok(Depth::Zero),
        "1" => Ok(Depth::One),
        v if v.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
        v => Err(DavError::BadRequest(format!("unsupported Depth: {}", v))),
    }
}

impl DavInner {
    fn collection_entry(&self, path: &NormalizedPath, name: &str) -> PropEntry {
        PropEntry::collection(path.as_dir().to_href(&self.prefix), name)
    }

    fn virtual_entries(&self, base: &NormalizedPath, level: &VirtualLevel, skip: &BTreeSet<String>) -> Vec<PropEntry> {
        let mut entries = vec![];
        for name in &level.subdirectories {
            if !skip.contains(name) {
                entries.push(self.collection_entry(&base.join_dir(name), name));
            }
        }
        for m in &level.mounts {
            let child = NormalizedPath::from_decoded(&m.mount_path).unwrap_or_else(|_| base.clone());
            let name = child.name().to_owned();
            if skip.contains(&name) {
                continue;
            }
            let mut entry = self.collection_entry(&child, &name);
            entry.last_modified = Some(m.updated_at);
            entries.push(entry);
        }
        entries
    }

    fn listing_entries(&self, base: &NormalizedPath, listing: &DirectoryListing) -> Vec<PropEntry> {
        let mut entries = vec![];
        for folder in &listing.folders {
            entries.push(self.collection_entry(&base.join_dir(folder), folder));
        }
        for file in &listing.files {
            entries.push(PropEntry {
                href: base.join_file(&file.name).to_href(&self.prefix),
                display_name: file.name.clone(),
                is_collection: false,
                content_length: Some(file.meta.size),
                content_type: file.meta.content_type.clone().or_else(|| {
                    mime_guess::from_path(&file.name)
                        .first_raw()
                        .map(str::to_owned)
                }),
                last_modified: file.meta.last_modified,
                etag: file.meta.etag.clone(),
            });
        }
        entries
    }

    pub(super) async fn handle_propfind(
        &self,
        ctx: &RequestContext,
        req: Request<Body>,
    ) -> Result<Response<Body>, DavError> {
        let depth = parse_depth(req.headers())?;
        let path = &ctx.path;
        let level = ctx.aggregate.find_routes_at_level(path);

        let entries = match ctx.aggregate.find_route(path) {
            None => {
                if level.is_empty() && !path.is_root() {
                    return Err(DavError::NotFound);
                }
                let mut entries = vec![self.collection_entry(path, path.name())];
                if depth != Depth::Zero {
                    entries.extend(self.virtual_entries(path, &level, &BTreeSet::new()));
                }
                entries
            }
            Some(location) => {
                let target = self.target(location).await?;

                if !path.is_collection() && !target.is_mount_root() {
                    let key = target.file_key()?;
                    if let Some(meta) = target.client.head(&key).await? {
                        debug!(key = %key, "propfind on a file");
                        let name = path.name().to_owned();
                        return render(vec![PropEntry {
                            href: path.to_href(&self.prefix),
                            content_type: meta
                                .content_type
                                .clone()
                                .or_else(|| mime_guess::from_path(&name).first_raw().map(str::to_owned)),
                            display_name: name,
                            is_collection: false,
                            content_length: Some(meta.size),
                            last_modified: meta.last_modified,
                            etag: meta.etag,
                        }]);
                    }
                }

                let prefix = target.dir_key();
                let listing = self.directory_listing(&target, &prefix).await?;
                if !target.is_mount_root()
                    && !listing.marker_present
                    && listing.is_empty()
                    && level.is_empty()
                {
                    return Err(DavError::NotFound);
                }

                let mut self_entry = self.collection_entry(path, path.name());
                if target.is_mount_root() {
                    self_entry.last_modified = Some(target.mount.updated_at);
                }
                let mut entries = vec![self_entry];
                if depth != Depth::Zero {
                    entries.extend(self.listing_entries(path, &listing));
                    let mut taken = listing.folders.clone();
                    taken.extend(listing.files.iter().map(|f| f.name.clone()));
                    entries.extend(self.virtual_entries(path, &level, &taken));
                }
                entries
            }
        };

        render(entries)
    }
}

fn render(entries: Vec<PropEntry>) -> Result<Response<Body>, DavError> {
    let body = multistatus(&entries);
    Ok(Response::builder()
        .status(StatusCode::MULTI_STATUS)
        .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))?)
}
