//! In-memory ZIP assembly.

use crate::keys::member_name_from_key;
use bytes::Bytes;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors serializing an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named byte blobs in insertion order
#[derive(Debug, Default)]
pub struct Archive {
    entries: Vec<(String, Bytes)>,
    names: HashSet<String>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object under the trailing segment of its key; `index` is its
    /// position in the selection, used when the key has no usable name.
    /// Returns the member name actually used.
    pub fn add_object(&mut self, key: &str, index: usize, bytes: Bytes) -> String {
        let name = member_name_from_key(key);
        let name = if name.is_empty() {
            format!("image_{}.jpg", index + 1)
        } else {
            name.to_string()
        };
        self.add(name, bytes)
    }

    /// Add a member, renaming `stem.ext` to `stem_n.ext` on collision
    pub fn add(&mut self, name: impl Into<String>, bytes: Bytes) -> String {
        let name = self.unique_name(name.into());
        self.names.insert(name.clone());
        self.entries.push((name.clone(), bytes));
        name
    }

    fn unique_name(&self, name: String) -> String {
        if !self.names.contains(&name) {
            return name;
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name.as_str(), None),
        };

        (1..)
            .map(|n| match ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            })
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to a ZIP container. Members are stored uncompressed.
    pub fn serialize(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(self.entries.iter().any(|(_, b)| b.len() as u64 >= u32::MAX as u64));

        for (name, bytes) in &self.entries {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(bytes)?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_back(data: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut zip = zip::ZipArchive::new(Cursor::new(data)).unwrap();
        (0..zip.len())
            .map(|i| {
                let mut file = zip.by_index(i).unwrap();
                let mut content = Vec::new();
                file.read_to_end(&mut content).unwrap();
                (file.name().to_string(), content)
            })
            .collect()
    }

    #[test]
    fn test_member_names_from_keys() {
        let mut archive = Archive::new();
        assert_eq!(
            archive.add_object("party/alice/17-cake.jpg", 0, Bytes::from_static(b"a")),
            "17-cake.jpg"
        );
        assert_eq!(
            archive.add_object("party/alice/", 1, Bytes::from_static(b"b")),
            "image_2.jpg"
        );
    }

    #[test]
    fn test_collisions_get_index_suffix() {
        let mut archive = Archive::new();
        assert_eq!(archive.add("cake.jpg", Bytes::new()), "cake.jpg");
        assert_eq!(archive.add("cake.jpg", Bytes::new()), "cake_1.jpg");
        assert_eq!(archive.add("cake.jpg", Bytes::new()), "cake_2.jpg");
        assert_eq!(archive.add("README", Bytes::new()), "README");
        assert_eq!(archive.add("README", Bytes::new()), "README_1");
        assert_eq!(archive.add(".hidden", Bytes::new()), ".hidden");
        assert_eq!(archive.add(".hidden", Bytes::new()), ".hidden_1");
        assert_eq!(archive.len(), 7);
    }

    #[test]
    fn test_serialize_round_trips_members_in_order() {
        let mut archive = Archive::new();
        archive.add("b.jpg", Bytes::from_static(b"second"));
        archive.add("a.jpg", Bytes::from_static(b"first"));

        let members = read_back(archive.serialize().unwrap());
        assert_eq!(
            members,
            vec![
                ("b.jpg".to_string(), b"second".to_vec()),
                ("a.jpg".to_string(), b"first".to_vec()),
            ]
        );
    }

    #[test]
    fn test_empty_archive_is_valid_zip() {
        let archive = Archive::new();
        assert!(archive.is_empty());
        assert!(read_back(archive.serialize().unwrap()).is_empty());
    }
}
