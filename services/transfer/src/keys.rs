//! Object key derivation shared by the grant authority and the export pipeline.

/// Build the storage key for an upload.
///
/// Format: `{prefix}/{caller_identity}/{timestamp_ms}-{file_name}`
///
/// The caller segment keeps keys from different callers disjoint, and the
/// millisecond timestamp orders one caller's uploads. The prefix is used
/// verbatim as the first path segment.
pub fn object_key(prefix: &str, caller_identity: &str, timestamp_ms: i64, file_name: &str) -> String {
    format!(
        "{prefix}/{caller}/{timestamp}-{file_name}",
        prefix = prefix,
        caller = caller_identity,
        timestamp = timestamp_ms,
        file_name = file_name
    )
}

/// Trailing path segment of an object key, used as the archive member name.
pub fn member_name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or_default()
}

/// File name for an exported archive: `{context}_images_{epoch_ms}.zip`
pub fn archive_file_name(context: &str, epoch_ms: i64) -> String {
    format!("{}_images_{}.zip", context, epoch_ms)
}

/// Guess a MIME type from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_format() {
        let key = object_key("ana-and-marko", "user-42", 1746492676048, "DSC_6346.jpg");
        assert_eq!(key, "ana-and-marko/user-42/1746492676048-DSC_6346.jpg");
    }

    #[test]
    fn test_keys_differ_by_caller() {
        let a = object_key("party", "alice", 1000, "cake.jpg");
        let b = object_key("party", "bob", 1000, "cake.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn test_member_name_from_key() {
        assert_eq!(member_name_from_key("party/alice/1000-cake.jpg"), "1000-cake.jpg");
        assert_eq!(member_name_from_key("cake.jpg"), "cake.jpg");
        assert_eq!(member_name_from_key("party/alice/"), "");
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("ana-and-marko", 1700000000000),
            "ana-and-marko_images_1700000000000.zip"
        );
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("IMG_001.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.mov"), "video/quicktime");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }
}
