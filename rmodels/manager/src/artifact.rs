use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use rmodels_schema::{keys, ModelConfiguration};
use uuid::Uuid;

use crate::error::{ManagerError, ManagerResult};

const ARTIFACT_EXTENSION: &str = "model";
const EXPORT_EXTENSION: &str = "pmml";
const HEADER_SUFFIX: &str = ".header";
const PENDING_SUFFIX: &str = ".pending";
const TRAINING_DIR: &str = "training";

/// Where a model should come from when it is added or reconfigured.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Serialized artifact; copied into storage and owned by the manager.
    Bytes(Vec<u8>),
    /// Existing artifact referenced in place; never deleted by the manager.
    File(PathBuf),
    /// Train from an existing instance dump.
    TrainingFile(PathBuf),
    /// Train from in-memory instances, dumped to a temporary file first.
    TrainingInstances(Vec<Vec<rmodels_schema::FieldValue>>),
}

/// File layout of artifacts, export files and training scratch space.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one model: `model.save.location` when set, else the root.
    #[must_use]
    pub fn directory_for(&self, config: &ModelConfiguration) -> PathBuf {
        config
            .property(keys::MODEL_SAVE_PATH)
            .map_or_else(|| self.root.clone(), PathBuf::from)
    }

    /// `<dir>/<id>.model`.
    #[must_use]
    pub fn artifact_path(&self, config: &ModelConfiguration, id: Uuid) -> PathBuf {
        self.directory_for(config)
            .join(format!("{id}.{ARTIFACT_EXTENSION}"))
    }

    /// `<dir>/<id>.pmml`.
    #[must_use]
    pub fn export_path(&self, config: &ModelConfiguration, id: Uuid) -> PathBuf {
        self.directory_for(config)
            .join(format!("{id}.{EXPORT_EXTENSION}"))
    }

    /// Fresh scratch file under `<root>/training/` with the given extension.
    #[must_use]
    pub fn scratch_path(&self, extension: &str) -> PathBuf {
        self.root
            .join(TRAINING_DIR)
            .join(format!("{}.{extension}", Uuid::new_v4().simple()))
    }

    /// Header sidecar of an artifact.
    #[must_use]
    pub fn header_path(artifact: &Path) -> PathBuf {
        suffixed(artifact, HEADER_SUFFIX)
    }

    /// Location a retrained artifact is written to before it replaces `artifact`.
    #[must_use]
    pub fn pending_path(artifact: &Path) -> PathBuf {
        suffixed(artifact, PENDING_SUFFIX)
    }

    /// Creates the directory `path` will live in.
    pub fn prepare_directory(path: &Path) -> ManagerResult<()> {
        ensure_parent(path)
    }

    /// Writes `bytes` to `path`, creating parent directories.
    pub fn write_bytes(path: &Path, bytes: &[u8]) -> ManagerResult<()> {
        ensure_parent(path)?;
        fs::write(path, bytes).map_err(ManagerError::resource("write artifact", path))
    }

    /// Writes the comma-separated attribute names next to a trained artifact.
    pub fn write_header(path: &Path, names: &[String]) -> ManagerResult<()> {
        ensure_parent(path)?;
        fs::write(path, format!("{}\n", names.join(",")))
            .map_err(ManagerError::resource("write header", path))
    }

    /// Reads a whole file.
    pub fn read_bytes(path: &Path, operation: &'static str) -> ManagerResult<Vec<u8>> {
        fs::read(path).map_err(ManagerError::resource(operation, path))
    }

    /// Reads a text file such as custom engine code.
    pub fn read_text(path: &Path, operation: &'static str) -> ManagerResult<String> {
        fs::read_to_string(path).map_err(ManagerError::resource(operation, path))
    }

    /// Fails unless `path` is an existing file.
    pub fn require_file(path: &Path) -> ManagerResult<()> {
        let metadata = fs::metadata(path).map_err(ManagerError::resource("locate artifact", path))?;
        if metadata.is_file() {
            Ok(())
        } else {
            Err(ManagerError::Resource {
                operation: "locate artifact",
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            })
        }
    }

    /// Moves `from` over `to`.
    pub fn replace(from: &Path, to: &Path) -> ManagerResult<()> {
        fs::rename(from, to).map_err(ManagerError::resource("replace artifact", to))
    }

    /// Copies `source` to `destination`, gzip-compressing on the way when
    /// `compress` is set. Returns the bytes written.
    pub fn copy_out(source: &Path, destination: &Path, compress: bool) -> ManagerResult<u64> {
        ensure_parent(destination)?;
        let input = File::open(source).map_err(ManagerError::resource("open export", source))?;
        let mut reader = BufReader::new(input);
        let output =
            File::create(destination).map_err(ManagerError::resource("create copy", destination))?;
        let writer = BufWriter::new(output);
        let wrap = ManagerError::resource("copy", destination);
        let written = if compress {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            io::copy(&mut reader, &mut encoder)
                .and_then(|_| encoder.finish())
                .and_then(|mut inner| inner.flush().map(|()| inner))
                .and_then(|inner| inner.get_ref().metadata())
                .map(|metadata| metadata.len())
        } else {
            let mut writer = writer;
            io::copy(&mut reader, &mut writer).and_then(|count| writer.flush().map(|()| count))
        };
        written.map_err(wrap)
    }

    /// Deletes a file; a file that is already gone is not an error.
    pub fn remove(path: &Path) -> ManagerResult<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                Err(ManagerError::resource("delete", path)(err))
            }
            _ => Ok(()),
        }
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn ensure_parent(path: &Path) -> ManagerResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(ManagerError::resource("create directory", parent))
        }
        _ => Ok(()),
    }
}
