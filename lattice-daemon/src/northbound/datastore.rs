//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lattice_yang::YANG_CTX;
use tracing::debug;
use yang3::data::{
    Data, DataFormat, DataParserFlags, DataPrinterFlags, DataTree,
    DataValidationFlags,
};

// A named configuration instance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum DatastoreId {
    Candidate,
    Running,
    Startup,
    Failsafe,
    Tmp,
}

// NETCONF edit-config operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EditOperation {
    #[default]
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    None,
}

// On-disk render format for persistent datastores.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FileFormat {
    #[default]
    Xml,
    Json,
}

#[derive(Debug)]
pub enum Error {
    // Datastore instance doesn't exist.
    NotFound(DatastoreId),
    // Datastore instance already exists.
    Exists(DatastoreId),
    // `create` on data that is already present.
    DataExists(String),
    // `delete` on data that is absent.
    DataMissing(String),
    // The datastore can't be deleted or replaced wholesale.
    Protected(DatastoreId),
    Io(std::io::Error),
    Yang(yang3::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// The set of named datastores and their backing files.
//
// Running, startup and failsafe persist one file each under the datastore
// directory; candidate and tmp are volatile. The in-memory trees act as a
// write-through cache over the files: every mutation of a persistent store
// is written back before the call returns.
#[derive(Debug)]
pub struct Datastores {
    dir: PathBuf,
    format: FileFormat,
    pretty: bool,
    cache_enabled: bool,
    trees: BTreeMap<DatastoreId, DataTree<'static>>,
    dirty: BTreeSet<DatastoreId>,
}

// ===== impl DatastoreId =====

impl DatastoreId {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DatastoreId::Candidate => "candidate",
            DatastoreId::Running => "running",
            DatastoreId::Startup => "startup",
            DatastoreId::Failsafe => "failsafe",
            DatastoreId::Tmp => "tmp",
        }
    }

    // Whether the datastore survives restarts.
    pub const fn is_persistent(&self) -> bool {
        matches!(
            self,
            DatastoreId::Running | DatastoreId::Startup | DatastoreId::Failsafe
        )
    }
}

impl std::fmt::Display for DatastoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatastoreId {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(DatastoreId::Candidate),
            "running" => Ok(DatastoreId::Running),
            "startup" => Ok(DatastoreId::Startup),
            "failsafe" => Ok(DatastoreId::Failsafe),
            "tmp" => Ok(DatastoreId::Tmp),
            _ => Err(()),
        }
    }
}

// ===== impl EditOperation =====

impl std::str::FromStr for EditOperation {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "merge" => Ok(EditOperation::Merge),
            "replace" => Ok(EditOperation::Replace),
            "create" => Ok(EditOperation::Create),
            "delete" => Ok(EditOperation::Delete),
            "remove" => Ok(EditOperation::Remove),
            "none" => Ok(EditOperation::None),
            _ => Err(()),
        }
    }
}

// ===== impl FileFormat =====

impl FileFormat {
    const fn data_format(&self) -> DataFormat {
        match self {
            FileFormat::Xml => DataFormat::XML,
            FileFormat::Json => DataFormat::JSON,
        }
    }

    const fn extension(&self) -> &'static str {
        match self {
            FileFormat::Xml => "xml",
            FileFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "xml" => Ok(FileFormat::Xml),
            "json" => Ok(FileFormat::Json),
            _ => Err(()),
        }
    }
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound(id) => {
                write!(f, "datastore not found: {id}")
            }
            Error::Exists(id) => {
                write!(f, "datastore already exists: {id}")
            }
            Error::DataExists(path) => {
                write!(f, "data already exists: {path}")
            }
            Error::DataMissing(path) => {
                write!(f, "data is missing: {path}")
            }
            Error::Protected(id) => {
                write!(f, "datastore can't be removed: {id}")
            }
            Error::Io(error) => {
                write!(f, "I/O error: {error}")
            }
            Error::Yang(error) => {
                write!(f, "YANG data error: {error}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io(error)
    }
}

// ===== impl Datastores =====

impl Datastores {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        format: FileFormat,
        cache_enabled: bool,
    ) -> Result<Datastores> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let yang_ctx = YANG_CTX.get().unwrap();
        let mut datastores = Datastores {
            dir,
            format,
            pretty: false,
            cache_enabled,
            trees: BTreeMap::new(),
            dirty: BTreeSet::new(),
        };

        // The candidate and running datastores exist from the first touch.
        // Persisted state is picked up by explicit `load` calls so that the
        // caller can categorize parse failures.
        datastores
            .trees
            .insert(DatastoreId::Candidate, DataTree::new(yang_ctx));
        datastores
            .trees
            .insert(DatastoreId::Running, DataTree::new(yang_ctx));

        Ok(datastores)
    }

    pub fn set_cache(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    pub fn set_pretty(&mut self, pretty: bool) {
        self.pretty = pretty;
    }

    pub fn set_format(&mut self, format: FileFormat) {
        self.format = format;
    }

    pub fn exists(&self, id: DatastoreId) -> bool {
        self.trees.contains_key(&id)
    }

    pub fn is_dirty(&self, id: DatastoreId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn create(&mut self, id: DatastoreId) -> Result<()> {
        if self.exists(id) {
            return Err(Error::Exists(id));
        }
        let yang_ctx = YANG_CTX.get().unwrap();
        self.trees.insert(id, DataTree::new(yang_ctx));
        self.persist(id)?;
        Ok(())
    }

    pub fn delete(&mut self, id: DatastoreId) -> Result<()> {
        if matches!(id, DatastoreId::Running | DatastoreId::Candidate) {
            return Err(Error::Protected(id));
        }
        if self.trees.remove(&id).is_none() {
            return Err(Error::NotFound(id));
        }
        self.dirty.remove(&id);
        let path = self.file_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // Atomic from the caller's point of view: the in-memory tree is swapped
    // wholesale and the backing file is written through a rename.
    pub fn copy(&mut self, src: DatastoreId, dst: DatastoreId) -> Result<()> {
        let src_tree = self.tree(src)?.duplicate().map_err(Error::Yang)?;
        self.trees.insert(dst, src_tree);
        self.dirty.remove(&dst);
        if dst.is_persistent() {
            self.persist(dst)?;
        }
        Ok(())
    }

    pub fn tree(&self, id: DatastoreId) -> Result<&DataTree<'static>> {
        self.trees.get(&id).ok_or(Error::NotFound(id))
    }

    // Retrieves a full or partial copy of a datastore (teacher-style
    // XPath-filtered extraction).
    pub fn get(
        &mut self,
        id: DatastoreId,
        xpath: Option<&str>,
        depth: Option<usize>,
    ) -> Result<DataTree<'static>> {
        // With the cache disabled, re-read persistent stores from disk so
        // readers observe exactly what was last written through.
        if !self.cache_enabled && id.is_persistent() {
            self.load(id)?;
        }

        let tree = self.tree(id)?;
        let mut dtree = match xpath {
            Some(xpath) => {
                let yang_ctx = YANG_CTX.get().unwrap();
                let mut dtree = DataTree::new(yang_ctx);
                for dnode in tree.find_xpath(xpath).map_err(Error::Yang)? {
                    let subtree =
                        dnode.duplicate(true).map_err(Error::Yang)?;
                    dtree.merge(&subtree).map_err(Error::Yang)?;
                }
                dtree
            }
            None => tree.duplicate().map_err(Error::Yang)?,
        };

        if let Some(depth) = depth {
            prune_below_depth(&mut dtree, depth);
        }

        Ok(dtree)
    }

    // Applies a parsed edit to a datastore, following NETCONF `edit-config`
    // semantics for the given operation.
    pub fn put(
        &mut self,
        id: DatastoreId,
        source: &DataTree<'static>,
        op: EditOperation,
    ) -> Result<()> {
        let tree = self.trees.get_mut(&id).ok_or(Error::NotFound(id))?;
        edit_tree(tree, source, op)?;
        self.dirty.insert(id);
        if id.is_persistent() {
            self.persist(id)?;
        }
        Ok(())
    }

    // Replaces the full contents of a datastore.
    pub fn replace(
        &mut self,
        id: DatastoreId,
        tree: DataTree<'static>,
    ) -> Result<()> {
        self.trees.insert(id, tree);
        self.dirty.remove(&id);
        if id.is_persistent() {
            self.persist(id)?;
        }
        Ok(())
    }

    pub fn mark_dirty(&mut self, id: DatastoreId) {
        self.dirty.insert(id);
    }

    pub fn clear_dirty(&mut self, id: DatastoreId) {
        self.dirty.remove(&id);
    }

    // Writes a persistent datastore to its backing file, atomically.
    pub fn persist(&mut self, id: DatastoreId) -> Result<()> {
        if !id.is_persistent() {
            return Ok(());
        }

        let tree = self.tree(id)?;
        let mut flags = DataPrinterFlags::WITH_SIBLINGS;
        if !self.pretty {
            flags |= DataPrinterFlags::SHRINK;
        }
        let data = tree
            .print_string(self.format.data_format(), flags)
            .map_err(Error::Yang)?;

        let path = self.file_path(id);
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &path)?;
        debug!(datastore = %id, path = %path.display(), "datastore persisted");
        Ok(())
    }

    // Loads a persistent datastore from its backing file, if present.
    pub fn load(&mut self, id: DatastoreId) -> Result<bool> {
        let path = self.file_path(id);
        if !path.exists() {
            return Ok(false);
        }

        let yang_ctx = YANG_CTX.get().unwrap();
        let data = std::fs::read_to_string(&path)?;
        let tree = DataTree::parse_string(
            yang_ctx,
            &data,
            self.format.data_format(),
            DataParserFlags::NO_VALIDATION,
            DataValidationFlags::NO_STATE,
        )
        .map_err(Error::Yang)?;
        self.trees.insert(id, tree);
        self.dirty.remove(&id);
        Ok(true)
    }

    fn file_path(&self, id: DatastoreId) -> PathBuf {
        self.dir
            .join(format!("{}.{}", id.as_str(), self.format.extension()))
    }
}

// ===== helper functions =====

// Applies `source` to `target` under the given edit operation.
pub(crate) fn edit_tree(
    target: &mut DataTree<'static>,
    source: &DataTree<'static>,
    op: EditOperation,
) -> Result<()> {
    match op {
        EditOperation::Merge => {
            target.merge(source).map_err(Error::Yang)?;
        }
        EditOperation::Replace => {
            for path in top_level_paths(source) {
                let _ = target.remove(&path);
            }
            target.merge(source).map_err(Error::Yang)?;
        }
        EditOperation::Create => {
            for path in top_level_paths(source) {
                if data_exists(target, &path) {
                    return Err(Error::DataExists(path));
                }
            }
            target.merge(source).map_err(Error::Yang)?;
        }
        EditOperation::Delete => {
            for path in top_level_paths(source) {
                if !data_exists(target, &path) {
                    return Err(Error::DataMissing(path));
                }
                target.remove(&path).map_err(Error::Yang)?;
            }
        }
        EditOperation::Remove => {
            for path in top_level_paths(source) {
                if data_exists(target, &path) {
                    target.remove(&path).map_err(Error::Yang)?;
                }
            }
        }
        EditOperation::None => (),
    }

    Ok(())
}

fn top_level_paths(tree: &DataTree<'static>) -> Vec<String> {
    tree.reference()
        .into_iter()
        .flat_map(|dnode| dnode.inclusive_siblings())
        .map(|dnode| dnode.path().to_owned())
        .collect()
}

fn data_exists(tree: &DataTree<'static>, path: &str) -> bool {
    tree.find_xpath(path)
        .map(|mut iter| iter.next().is_some())
        .unwrap_or(false)
}

// Removes every node nested deeper than `depth` levels.
fn prune_below_depth(tree: &mut DataTree<'static>, depth: usize) {
    if depth == 0 {
        return;
    }
    let doomed: Vec<String> = tree
        .traverse()
        .filter(|dnode| dnode.ancestors().count() >= depth)
        .map(|dnode| dnode.path().to_owned())
        .collect();
    // Remove bottom-up so parent removals don't invalidate pending paths.
    for path in doomed.iter().rev() {
        let _ = tree.remove(path);
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use yang3::data::Data;

    use super::*;
    use crate::northbound::tests::{context_init, parse_config};

    fn datastores() -> (Datastores, tempfile::TempDir) {
        context_init();
        let dir = tempfile::tempdir().unwrap();
        let ds =
            Datastores::new(dir.path(), FileFormat::Xml, true).unwrap();
        (ds, dir)
    }

    const HOSTNAME: &str = concat!(
        "<system xmlns=\"urn:lattice:system\">",
        "<hostname>rtr0</hostname>",
        "</system>"
    );

    #[test]
    fn merge_then_get() {
        let (mut ds, _dir) = datastores();
        let config = parse_config(HOSTNAME);
        ds.put(DatastoreId::Candidate, &config, EditOperation::Merge)
            .unwrap();
        assert!(ds.is_dirty(DatastoreId::Candidate));

        let tree = ds.get(DatastoreId::Candidate, None, None).unwrap();
        let hostname = tree
            .find_path("/lattice-system:system/hostname")
            .unwrap()
            .value_canonical()
            .unwrap();
        assert_eq!(hostname, "rtr0");
    }

    #[test]
    fn create_fails_when_data_exists() {
        let (mut ds, _dir) = datastores();
        let config = parse_config(HOSTNAME);
        ds.put(DatastoreId::Candidate, &config, EditOperation::Create)
            .unwrap();
        let result =
            ds.put(DatastoreId::Candidate, &config, EditOperation::Create);
        assert!(matches!(result, Err(Error::DataExists(_))));
    }

    #[test]
    fn delete_fails_when_data_missing() {
        let (mut ds, _dir) = datastores();
        let config = parse_config(HOSTNAME);
        let result =
            ds.put(DatastoreId::Candidate, &config, EditOperation::Delete);
        assert!(matches!(result, Err(Error::DataMissing(_))));

        // `remove` is `delete` without the error.
        ds.put(DatastoreId::Candidate, &config, EditOperation::Remove)
            .unwrap();
    }

    #[test]
    fn copy_resets_dirty_bit() {
        let (mut ds, _dir) = datastores();
        let config = parse_config(HOSTNAME);
        ds.put(DatastoreId::Candidate, &config, EditOperation::Merge)
            .unwrap();
        ds.copy(DatastoreId::Running, DatastoreId::Candidate).unwrap();
        assert!(!ds.is_dirty(DatastoreId::Candidate));

        let tree = ds.get(DatastoreId::Candidate, None, None).unwrap();
        assert!(tree.reference().is_none());
    }

    #[test]
    fn running_is_written_through_to_disk() {
        let (mut ds, dir) = datastores();
        let config = parse_config(HOSTNAME);
        ds.put(DatastoreId::Running, &config, EditOperation::Merge)
            .unwrap();
        assert!(dir.path().join("running.xml").exists());

        // A fresh instance over the same directory sees the same data.
        let mut ds2 =
            Datastores::new(dir.path(), FileFormat::Xml, true).unwrap();
        assert!(ds2.load(DatastoreId::Running).unwrap());
        let tree = ds2.get(DatastoreId::Running, None, None).unwrap();
        assert!(
            tree.find_path("/lattice-system:system/hostname").is_ok()
        );
    }

    #[test]
    fn running_cannot_be_deleted() {
        let (mut ds, _dir) = datastores();
        assert!(matches!(
            ds.delete(DatastoreId::Running),
            Err(Error::Protected(_))
        ));
    }

    #[test]
    fn xpath_filtered_get() {
        let (mut ds, _dir) = datastores();
        let config = parse_config(concat!(
            "<system xmlns=\"urn:lattice:system\">",
            "<hostname>rtr0</hostname>",
            "<location>lab</location>",
            "</system>"
        ));
        ds.put(DatastoreId::Candidate, &config, EditOperation::Merge)
            .unwrap();

        let tree = ds
            .get(
                DatastoreId::Candidate,
                Some("/lattice-system:system/hostname"),
                None,
            )
            .unwrap();
        assert!(tree.find_path("/lattice-system:system/hostname").is_ok());
        assert!(tree.find_path("/lattice-system:system/location").is_err());
    }
}
