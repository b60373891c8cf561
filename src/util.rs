use std::collections::HashSet;
use std::path::{Path, PathBuf};

const PROFILE_START: &str = "#{";
const PROFILE_END: &str = "</key>";

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Percent-encode one path segment so ids and names cannot escape the route.
pub(crate) fn segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Slice the VPN profile out of a downloaded key archive body.
///
/// The profile starts at the `#{` header marker and ends after the closing
/// `</key>` tag (plus one trailing newline, when present).
pub(crate) fn extract_profile(body: &str) -> Option<&str> {
    let start = body.find(PROFILE_START)?;
    let end_tag = body[start..].find(PROFILE_END)? + start + PROFILE_END.len();
    let end = match body[end_tag..].chars().next() {
        Some('\n') => end_tag + 1,
        _ => end_tag,
    };
    Some(&body[start..end])
}

/// Pick `{name}.ovpn` in `dir`, or `{name}-{id}.ovpn` when that file exists
/// or was already claimed by an earlier item of the same batch. An id listed
/// twice in one batch continues with `{name}-{id}-2.ovpn`, `-3` and so on.
pub(crate) async fn profile_destination(
    dir: &Path,
    name: &str,
    id: &str,
    claimed: &mut HashSet<PathBuf>,
) -> PathBuf {
    let stem = file_stem(name, id);
    let mut attempt = 0usize;
    loop {
        let path = dir.join(match attempt {
            0 => format!("{}.ovpn", stem),
            1 => format!("{}-{}.ovpn", stem, id),
            n => format!("{}-{}-{}.ovpn", stem, id, n),
        });
        let on_disk = attempt == 0 && tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !on_disk && claimed.insert(path.clone()) {
            return path;
        }
        attempt += 1;
    }
}

// Server-provided names must not introduce directories.
fn file_stem<'a>(name: &'a str, id: &'a str) -> &'a str {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        id
    } else {
        name
    }
}

/// Keep only the final component of a server-supplied file name.
pub(crate) fn safe_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
