use crate::error::{DecodeError, Error, Result};
use crate::wire::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Where one patch payload lives: `size` bytes at `offset` inside container `container_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatchSegment {
    pub container_id: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub file_name: String,
    pub expected_size: u64,
    /// Hex MD5 of the final patched file.
    pub expected_hash: String,
    /// Candidate payloads in manifest order (every `file_data[*].patch_info[*]`).
    pub patch_segments: Vec<PatchSegment>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

/// Protobuf field numbers of the externally defined manifest schema.
///
/// The `.proto` the manifests are built from is not shipped here, so the
/// defaults (entries = 1; file name, size, hash, file data = 1..4; patch info
/// = 1; id, offset, size = 1..3) are a best guess at a plain sequential
/// numbering. Check them against real manifests and pass `--schema` with the
/// actual numbers when they differ. Overridable from a JSON file; any field
/// left out keeps its default.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ManifestSchema {
    pub root_entries: u32,
    pub entry_file_name: u32,
    pub entry_size: u32,
    pub entry_file_hash: u32,
    pub entry_file_data: u32,
    pub file_data_patch_info: u32,
    pub patch_id: u32,
    pub patch_offset: u32,
    pub patch_size: u32,
}

impl Default for ManifestSchema {
    fn default() -> Self {
        Self {
            root_entries: 1,
            entry_file_name: 1,
            entry_size: 2,
            entry_file_hash: 3,
            entry_file_data: 4,
            file_data_patch_info: 1,
            patch_id: 1,
            patch_offset: 2,
            patch_size: 3,
        }
    }
}

impl ManifestSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|source| Error::Io { path: path.into(), source })?;
        serde_json::from_reader(f).map_err(|source| Error::Schema { path: path.into(), source })
    }
}

impl Manifest {
    /// Read and decode a manifest file.
    pub fn load(path: &Path, schema: &ManifestSchema) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| Error::Io { path: path.into(), source })?;
        let manifest = Self::decode(&bytes, schema)?;
        log::info!("decoded {} manifest entries from {}", manifest.entries.len(), path.display());
        Ok(manifest)
    }

    /// Decode raw manifest bytes. Unknown fields are skipped.
    pub fn decode(bytes: &[u8], schema: &ManifestSchema) -> std::result::Result<Self, DecodeError> {
        let mut entries = Vec::new();
        let mut root = Reader::new(bytes);
        while let Some(field) = root.next_field()? {
            if field.number == schema.root_entries {
                entries.push(decode_entry(field.as_message()?, schema)?);
            }
        }
        Ok(Self { entries })
    }

    /// Encode back to the wire format described by `schema`.
    pub fn encode(&self, schema: &ManifestSchema) -> Vec<u8> {
        let mut root = Writer::new();
        for e in &self.entries {
            let mut entry = Writer::new();
            entry
                .string(schema.entry_file_name, &e.file_name)
                .varint(schema.entry_size, e.expected_size)
                .string(schema.entry_file_hash, &e.expected_hash);
            for seg in &e.patch_segments {
                let mut info = Writer::new();
                info.string(schema.patch_id, &seg.container_id)
                    .varint(schema.patch_offset, seg.offset)
                    .varint(schema.patch_size, seg.size);
                let mut data = Writer::new();
                data.message(schema.file_data_patch_info, info);
                entry.message(schema.entry_file_data, data);
            }
            root.message(schema.root_entries, entry);
        }
        root.finish()
    }

    /// Pretty JSON dump of the decoded manifest, for inspection only.
    pub fn dump_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }
}

fn decode_entry(
    mut r: Reader<'_>,
    schema: &ManifestSchema,
) -> std::result::Result<ManifestEntry, DecodeError> {
    let mut entry = ManifestEntry::default();
    while let Some(f) = r.next_field()? {
        match f.number {
            n if n == schema.entry_file_name => entry.file_name = f.as_str()?.to_string(),
            n if n == schema.entry_file_hash => entry.expected_hash = f.as_str()?.to_string(),
            n if n == schema.entry_size => entry.expected_size = f.as_non_negative()?,
            n if n == schema.entry_file_data => {
                let mut data = f.as_message()?;
                while let Some(df) = data.next_field()? {
                    if df.number == schema.file_data_patch_info {
                        entry.patch_segments.push(decode_patch_info(df.as_message()?, schema)?);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(entry)
}

fn decode_patch_info(
    mut r: Reader<'_>,
    schema: &ManifestSchema,
) -> std::result::Result<PatchSegment, DecodeError> {
    let mut seg = PatchSegment { container_id: String::new(), offset: 0, size: 0 };
    while let Some(f) = r.next_field()? {
        match f.number {
            n if n == schema.patch_id => seg.container_id = f.as_str()?.to_string(),
            n if n == schema.patch_offset => seg.offset = f.as_non_negative()?,
            n if n == schema.patch_size => seg.size = f.as_non_negative()?,
            _ => {}
        }
    }
    Ok(seg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            entries: vec![
                ManifestEntry {
                    file_name: "a/b.bin".into(),
                    expected_size: 0,
                    expected_hash: "d41d8cd98f00b204e9800998ecf8427e".into(),
                    patch_segments: vec![PatchSegment {
                        container_id: "X".into(),
                        offset: 0,
                        size: 10,
                    }],
                },
                ManifestEntry {
                    file_name: "c.dat".into(),
                    expected_size: 1 << 33,
                    expected_hash: "00".into(),
                    patch_segments: vec![
                        PatchSegment { container_id: "A".into(), offset: 5, size: 6 },
                        PatchSegment { container_id: "B".into(), offset: 1 << 40, size: 7 },
                    ],
                },
            ],
        }
    }

    #[test]
    fn decodes_entries_and_flattens_segments() {
        let schema = ManifestSchema::default();
        let m = sample();
        let decoded = Manifest::decode(&m.encode(&schema), &schema).unwrap();
        assert_eq!(decoded, m);
        assert_eq!(decoded.entries[1].patch_segments[1].offset, 1 << 40);
    }

    #[test]
    fn multiple_patch_infos_in_one_file_data() {
        let schema = ManifestSchema::default();
        let mut data = Writer::new();
        for (id, off) in [("P", 1u64), ("Q", 2)] {
            let mut info = Writer::new();
            info.string(schema.patch_id, id).varint(schema.patch_offset, off).varint(schema.patch_size, 3);
            data.message(schema.file_data_patch_info, info);
        }
        let mut entry = Writer::new();
        entry.string(schema.entry_file_name, "f").message(schema.entry_file_data, data);
        let mut root = Writer::new();
        root.message(schema.root_entries, entry);

        let m = Manifest::decode(&root.finish(), &schema).unwrap();
        let ids: Vec<_> = m.entries[0].patch_segments.iter().map(|s| s.container_id.as_str()).collect();
        assert_eq!(ids, ["P", "Q"]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let schema = ManifestSchema::default();
        let mut entry = Writer::new();
        entry.string(schema.entry_file_name, "x").varint(99, 5).string(98, "junk");
        let mut root = Writer::new();
        root.varint(7, 1).message(schema.root_entries, entry);
        let m = Manifest::decode(&root.finish(), &schema).unwrap();
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].file_name, "x");
        assert!(m.entries[0].patch_segments.is_empty());
    }

    #[test]
    fn wrong_wire_type_is_a_decode_error() {
        let schema = ManifestSchema::default();
        let mut entry = Writer::new();
        entry.varint(schema.entry_file_name, 5);
        let mut root = Writer::new();
        root.message(schema.root_entries, entry);
        let err = Manifest::decode(&root.finish(), &schema).unwrap_err();
        assert!(matches!(err, DecodeError::WireTypeMismatch { field: 1, .. }));
    }

    #[test]
    fn truncated_manifest_fails() {
        let schema = ManifestSchema::default();
        let bytes = sample().encode(&schema);
        assert!(Manifest::decode(&bytes[..bytes.len() - 3], &schema).is_err());
    }

    #[test]
    fn empty_input_is_an_empty_manifest() {
        let m = Manifest::decode(&[], &ManifestSchema::default()).unwrap();
        assert!(m.entries.is_empty());
    }

    #[test]
    fn custom_schema_numbers() {
        let schema = ManifestSchema { root_entries: 5, entry_file_name: 9, ..Default::default() };
        let m = sample();
        let bytes = m.encode(&schema);
        assert_eq!(Manifest::decode(&bytes, &schema).unwrap(), m);
        // Default schema sees no entries under field 5.
        assert!(Manifest::decode(&bytes, &ManifestSchema::default()).unwrap().entries.is_empty());
    }

    #[test]
    fn schema_json_keeps_defaults_for_missing_keys() {
        let s: ManifestSchema = serde_json::from_str(r#"{"patch_offset": 6}"#).unwrap();
        assert_eq!(s.patch_offset, 6);
        assert_eq!(s.patch_size, ManifestSchema::default().patch_size);
    }

    #[test]
    fn dump_json_uses_camel_case() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("dump/manifest.json");
        sample().dump_json(&p).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        assert!(text.contains("\"fileName\": \"a/b.bin\""));
        assert!(text.contains("\"containerId\": \"X\""));
    }
}
