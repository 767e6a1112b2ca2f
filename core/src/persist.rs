use crate::index::Segment;
use crate::{DocId, SegmentId};
use anyhow::{Context, Result};
use bincode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

/// Contents of `meta.json`: the last committed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub generation: u64,
    pub next_segment_id: SegmentId,
    pub segments: Vec<SegmentMeta>,
    pub committed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    /// Tombstoned documents of this segment, sorted.
    pub deleted: Vec<DocId>,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    fn meta_tmp(&self) -> PathBuf { self.root.join("meta.json.tmp") }
    fn segments_dir(&self) -> PathBuf { self.root.join("segments") }
    fn segment(&self, id: SegmentId) -> PathBuf { self.segments_dir().join(format!("{id:08}.seg.bin")) }
}

pub fn save_segment(paths: &IndexPaths, segment: &Segment) -> Result<()> {
    let dir = paths.segments_dir();
    create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let file = paths.segment(segment.id);
    let mut f = File::create(&file).with_context(|| format!("creating {}", file.display()))?;
    let bytes = bincode::serialize(segment)?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

pub fn load_segment(paths: &IndexPaths, id: SegmentId) -> Result<Segment> {
    let file = paths.segment(id);
    let mut f = File::open(&file).with_context(|| format!("opening {}", file.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let segment: Segment = bincode::deserialize(&buf).with_context(|| format!("decoding {}", file.display()))?;
    Ok(segment)
}

/// Write `meta.json` through a temporary file; the rename publishes the generation.
pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root).with_context(|| format!("creating {}", paths.root.display()))?;
    let tmp = paths.meta_tmp();
    let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    f.sync_all()?;
    fs::rename(&tmp, paths.meta()).context("publishing meta.json")?;
    Ok(())
}

/// Returns `None` for a directory that has never been committed to.
pub fn load_meta(paths: &IndexPaths) -> Result<Option<MetaFile>> {
    let mut f = match File::open(paths.meta()) {
        Ok(f) => f,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("opening meta.json"),
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf).context("decoding meta.json")?;
    anyhow::ensure!(meta.version == FORMAT_VERSION, "unsupported index format version {}", meta.version);
    Ok(Some(meta))
}

/// Delete segment files not listed in `live`. Returns how many were removed.
pub fn remove_unreferenced_segments(paths: &IndexPaths, live: &HashSet<SegmentId>) -> Result<usize> {
    let dir = paths.segments_dir();
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        let id = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|name| name.strip_suffix(".seg.bin"))
            .and_then(|stem| stem.parse::<SegmentId>().ok());
        if let Some(id) = id {
            if !live.contains(&id) {
                fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
