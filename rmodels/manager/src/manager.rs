use std::{
    net::TcpStream,
    path::{Path, PathBuf},
};

use anyhow::Context;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rmodels_protocol::{EngineChannel, RSession, RserveClient};
use rmodels_schema::{keys, FieldValue, InstanceDump, ModelConfiguration, SchemaError};
use rmodels_scripting::{export_invocation, namespace_name, ScriptGenerator};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    artifact::{ArtifactSource, ArtifactStore},
    config::ManagerConfig,
    error::{ManagerError, ManagerResult},
    install::{install_namespace, teardown_namespace},
    registry::{ModelRecord, NamespaceRegistry},
    telemetry::ManagerTelemetry,
};

/// Artifact produced for an add or reconfigure, not yet attached to a record.
#[derive(Debug)]
struct Materialized {
    path: PathBuf,
    owned: bool,
    header: Option<PathBuf>,
}

impl Materialized {
    const fn referenced(path: PathBuf) -> Self {
        Self {
            path,
            owned: false,
            header: None,
        }
    }

    fn discard(&self) {
        if self.owned {
            let _ = ArtifactStore::remove(&self.path);
        }
        if let Some(header) = &self.header {
            let _ = ArtifactStore::remove(header);
        }
    }
}

/// Lifecycle surface over one engine: add, remove, reconfigure, train, score
/// and export models.
///
/// The registry lock is always taken before the engine channel's lock, and
/// every public operation holds the registry lock for its whole duration, so
/// programs belonging to different operations never interleave.
pub struct ModelManager<S: RSession> {
    registry: Mutex<NamespaceRegistry>,
    channel: EngineChannel<S>,
    store: ArtifactStore,
    telemetry: Option<ManagerTelemetry>,
}

impl ModelManager<RserveClient<TcpStream>> {
    /// Connects to the configured engine and wires up configured telemetry.
    pub fn connect(config: &ManagerConfig) -> anyhow::Result<Self> {
        let telemetry = config.telemetry()?;
        let address = config.engine_address();
        let client = match config.engine_timeout() {
            Some(timeout) => RserveClient::connect_timeout(address.as_str(), timeout),
            None => RserveClient::connect(address.as_str()),
        }
        .with_context(|| format!("connecting to engine at {address}"))?;
        let client = match telemetry.as_ref().and_then(ManagerTelemetry::logger) {
            Some(logger) => client.with_logger(logger),
            None => client,
        };
        let manager = Self::new(client, ArtifactStore::new(&config.storage.dir));
        Ok(match telemetry {
            Some(telemetry) => manager.with_telemetry(telemetry),
            None => manager,
        })
    }
}

impl<S: RSession> ModelManager<S> {
    /// Manager over an open session, storing files under `store`.
    #[must_use]
    pub fn new(session: S, store: ArtifactStore) -> Self {
        Self {
            registry: Mutex::new(NamespaceRegistry::new()),
            channel: EngineChannel::new(session),
            store,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ManagerTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// File layout used for artifacts.
    #[must_use]
    pub const fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Registers a model and builds its namespace.
    ///
    /// The identifier comes from the `id` property when set. Nothing becomes
    /// visible if any step fails, and files created on the way are removed.
    pub fn add_model(
        &self,
        config: ModelConfiguration,
        source: ArtifactSource,
    ) -> ManagerResult<Uuid> {
        let mut registry = self.registry.lock();
        let outcome = self.add_locked(&mut registry, config, source);
        match &outcome {
            Ok(id) => {
                self.log(LogLevel::Info, "model.added", json!({ "id": id }));
                self.event(
                    "model.added",
                    json!({ "id": id, "models": registry.len() }),
                );
            }
            Err(err) => {
                let payload = json!({ "error": err.to_string() });
                self.log(LogLevel::Error, "model.add_failed", payload.clone());
                self.event("model.add_failed", payload);
            }
        }
        outcome
    }

    /// Trains on `instances` and registers the result.
    pub fn train_and_add(
        &self,
        config: ModelConfiguration,
        instances: Vec<Vec<FieldValue>>,
    ) -> ManagerResult<Uuid> {
        self.add_model(config, ArtifactSource::TrainingInstances(instances))
    }

    /// Trains on an existing instance dump and registers the result.
    pub fn train_and_add_file(
        &self,
        config: ModelConfiguration,
        instances: impl Into<PathBuf>,
    ) -> ManagerResult<Uuid> {
        self.add_model(config, ArtifactSource::TrainingFile(instances.into()))
    }

    /// Unregisters a model, removes its namespace and deletes the files it owns.
    ///
    /// The namespace is removed first; if the engine refuses, nothing changes.
    /// A file that cannot be deleted is reported after the model is gone.
    pub fn remove_model(&self, id: Uuid) -> ManagerResult<()> {
        let mut registry = self.registry.lock();
        let record = registry
            .get(id)
            .cloned()
            .ok_or(ManagerError::UnknownModel(id))?;
        self.channel
            .with_session(|session| teardown_namespace(session, &record.namespace))?;
        registry.remove(id);
        let mut failure = None;
        for file in record.owned_files() {
            if let Err(err) = ArtifactStore::remove(&file) {
                failure.get_or_insert(err);
            }
        }
        self.log(
            LogLevel::Info,
            "model.removed",
            json!({ "id": id, "artifact": record.artifact_path }),
        );
        self.event("model.removed", json!({ "id": id, "models": registry.len() }));
        failure.map_or(Ok(()), Err)
    }

    /// Merges `newer` into the model's configuration, optionally swaps its
    /// artifact, and rebuilds the namespace from scratch.
    ///
    /// The new namespace is built beside the old one and only replaces it once
    /// complete; on failure the previous namespace, record and artifact stay
    /// as they were. A cached export is dropped before the rebuild starts.
    /// Replacing the artifact with raw bytes is not offered.
    pub fn reconfigure_model(
        &self,
        id: Uuid,
        newer: &ModelConfiguration,
        source: Option<ArtifactSource>,
    ) -> ManagerResult<()> {
        let mut registry = self.registry.lock();
        let current = registry
            .get(id)
            .cloned()
            .ok_or(ManagerError::UnknownModel(id))?;
        let mut config = current.config.clone();
        config.update(newer);
        ScriptGenerator::new(&config)?;
        if let Some(other) = config.model_id()? {
            if other != id {
                return Err(ManagerError::Configuration(format!(
                    "model identifier cannot change from {id} to {other}"
                )));
            }
        }
        let predict_code = custom_code(&config, keys::PREDICT_FILE)?;
        let target = self.store.artifact_path(&config, id);
        let export_path = self.store.export_path(&config, id);
        if matches!(source, Some(ArtifactSource::Bytes(_))) {
            return Err(ManagerError::Unsupported(
                "replacing a model artifact with raw bytes",
            ));
        }
        // Cached exports describe the previous namespace.
        ArtifactStore::remove(&current.export_path)?;
        ArtifactStore::remove(&export_path)?;
        let replacement = source
            .map(|source| self.materialize(&config, source, &ArtifactStore::pending_path(&target)))
            .transpose()?;
        let load_path = replacement
            .as_ref()
            .map_or(current.artifact_path.as_path(), |next| next.path.as_path());
        let installed = self.channel.with_session(|session| {
            install_namespace(
                session,
                &config,
                &current.namespace,
                load_path,
                &export_path,
                predict_code.as_deref(),
            )
        });
        if let Err(err) = installed {
            if let Some(replacement) = &replacement {
                replacement.discard();
            }
            self.log(
                LogLevel::Error,
                "model.reconfigure_failed",
                json!({ "id": id, "error": err.to_string() }),
            );
            return Err(err);
        }

        let mut record = ModelRecord {
            config,
            export_path,
            ..current.clone()
        };
        if let Some(replacement) = replacement {
            let owned = replacement.owned;
            let (path, header) = if owned {
                self.promote(replacement, &target)
            } else {
                (replacement.path, None)
            };
            if current.artifact_owned && current.artifact_path != path {
                let _ = ArtifactStore::remove(&current.artifact_path);
            }
            if let Some(previous) = &current.header_path {
                if header.as_ref() != Some(previous) {
                    let _ = ArtifactStore::remove(previous);
                }
            }
            record.artifact_owned = owned;
            record.artifact_path = path;
            record.header_path = header;
        }
        registry.insert(record);
        self.log(LogLevel::Info, "model.reconfigured", json!({ "id": id }));
        self.event("model.reconfigured", json!({ "id": id }));
        Ok(())
    }

    /// Snapshot of every registered model's configuration.
    #[must_use]
    pub fn list_models(&self) -> IndexMap<Uuid, ModelConfiguration> {
        self.registry.lock().snapshot()
    }

    /// Trains on `instances` and returns the serialized artifact.
    pub fn train(
        &self,
        config: &ModelConfiguration,
        instances: &[Vec<FieldValue>],
    ) -> ManagerResult<Vec<u8>> {
        ScriptGenerator::new(config)?;
        let _registry = self.registry.lock();
        let destination = self.store.scratch_path("model");
        let trained = self.train_rows_to(config, instances, &destination)?;
        let bytes = ArtifactStore::read_bytes(&trained.path, "read trained artifact");
        trained.discard();
        bytes
    }

    /// Trains on an existing instance dump and returns the serialized artifact.
    pub fn train_file(
        &self,
        config: &ModelConfiguration,
        instances: &Path,
    ) -> ManagerResult<Vec<u8>> {
        ScriptGenerator::new(config)?;
        ArtifactStore::require_file(instances)?;
        let _registry = self.registry.lock();
        let destination = self.store.scratch_path("model");
        let trained = self.train_to(config, instances, &destination)?;
        let bytes = ArtifactStore::read_bytes(&trained.path, "read trained artifact");
        trained.discard();
        bytes
    }

    /// Copies the model's export file to `destination`, gzip-compressed when
    /// `compress` is set. The export is produced on the engine only when the
    /// file does not exist yet. Returns the bytes written.
    pub fn export_artifact(
        &self,
        id: Uuid,
        destination: &Path,
        compress: bool,
    ) -> ManagerResult<u64> {
        let registry = self.registry.lock();
        let record = registry.get(id).ok_or(ManagerError::UnknownModel(id))?;
        let produced = !record.export_path.is_file();
        if produced {
            ArtifactStore::prepare_directory(&record.export_path)?;
            self.channel
                .evaluate(&export_invocation(&record.namespace))?;
            ArtifactStore::require_file(&record.export_path)?;
        }
        let written = ArtifactStore::copy_out(&record.export_path, destination, compress)?;
        self.event(
            "model.exported",
            json!({
                "id": id,
                "destination": destination,
                "compressed": compress,
                "produced": produced,
                "bytes": written,
            }),
        );
        Ok(written)
    }

    /// Copies the model's serialized artifact to `destination`.
    pub fn save_artifact(&self, id: Uuid, destination: &Path) -> ManagerResult<u64> {
        let registry = self.registry.lock();
        let record = registry.get(id).ok_or(ManagerError::UnknownModel(id))?;
        ArtifactStore::copy_out(&record.artifact_path, destination, false)
    }

    /// Scores one row against one model.
    pub fn score_one(&self, id: Uuid, row: &[FieldValue]) -> ManagerResult<Vec<f64>> {
        let registry = self.registry.lock();
        self.score_locked(&registry, id, row)
    }

    /// Scores the same row against several models.
    pub fn score(
        &self,
        ids: &[Uuid],
        row: &[FieldValue],
    ) -> ManagerResult<IndexMap<Uuid, Vec<f64>>> {
        let registry = self.registry.lock();
        ids.iter()
            .map(|id| Ok((*id, self.score_locked(&registry, *id, row)?)))
            .collect()
    }

    /// Scores one row per model, keeping the caller's key order.
    pub fn score_map(
        &self,
        rows: &IndexMap<Uuid, Vec<FieldValue>>,
    ) -> ManagerResult<IndexMap<Uuid, Vec<f64>>> {
        let registry = self.registry.lock();
        rows.iter()
            .map(|(id, row)| Ok((*id, self.score_locked(&registry, *id, row)?)))
            .collect()
    }

    /// Scores several rows against one model, one vector per row.
    pub fn score_rows(
        &self,
        id: Uuid,
        rows: &[Vec<FieldValue>],
    ) -> ManagerResult<Vec<Vec<f64>>> {
        let registry = self.registry.lock();
        if !registry.contains(id) {
            return Err(ManagerError::UnknownModel(id));
        }
        rows.iter()
            .map(|row| self.score_locked(&registry, id, row))
            .collect()
    }

    /// Removes every namespace and releases the connection. Files stay on disk.
    pub fn close(&self) -> ManagerResult<()> {
        let mut registry = self.registry.lock();
        let records = registry.drain();
        let failure = self.channel.with_session(|session| {
            let mut failure = None;
            for record in &records {
                if let Err(err) = teardown_namespace(session, &record.namespace) {
                    failure.get_or_insert(err);
                }
            }
            failure
        });
        let closed = self.channel.close();
        self.log(
            LogLevel::Info,
            "manager.closed",
            json!({ "models": records.len() }),
        );
        if let Some(err) = failure {
            return Err(err);
        }
        closed.map_err(Into::into)
    }

    /// Terminates the engine process. Every other client of that engine is
    /// affected.
    pub fn shutdown_engine(&self) -> ManagerResult<()> {
        let mut registry = self.registry.lock();
        let dropped = registry.drain().len();
        self.channel.shutdown()?;
        self.log(
            LogLevel::Warn,
            "engine.shutdown",
            json!({ "models": dropped }),
        );
        Ok(())
    }

    fn add_locked(
        &self,
        registry: &mut NamespaceRegistry,
        config: ModelConfiguration,
        source: ArtifactSource,
    ) -> ManagerResult<Uuid> {
        ScriptGenerator::new(&config)?;
        let id = config.model_id()?.unwrap_or_else(Uuid::new_v4);
        if registry.contains(id) {
            return Err(ManagerError::Configuration(format!(
                "model {id} is already registered"
            )));
        }
        let predict_code = custom_code(&config, keys::PREDICT_FILE)?;
        let namespace = namespace_name(id);
        let target = self.store.artifact_path(&config, id);
        let export_path = self.store.export_path(&config, id);
        ArtifactStore::remove(&export_path)?;

        let artifact = self.materialize(&config, source, &target)?;
        let installed = self.channel.with_session(|session| {
            install_namespace(
                session,
                &config,
                &namespace,
                &artifact.path,
                &export_path,
                predict_code.as_deref(),
            )
        });
        if let Err(err) = installed {
            artifact.discard();
            return Err(err);
        }
        registry.insert(ModelRecord {
            id,
            namespace,
            config,
            artifact_path: artifact.path,
            artifact_owned: artifact.owned,
            header_path: artifact.header,
            export_path,
        });
        Ok(id)
    }

    fn materialize(
        &self,
        config: &ModelConfiguration,
        source: ArtifactSource,
        destination: &Path,
    ) -> ManagerResult<Materialized> {
        match source {
            ArtifactSource::Bytes(bytes) => {
                ArtifactStore::write_bytes(destination, &bytes)?;
                Ok(Materialized {
                    path: destination.to_path_buf(),
                    owned: true,
                    header: None,
                })
            }
            ArtifactSource::File(path) => {
                ArtifactStore::require_file(&path)?;
                Ok(Materialized::referenced(path))
            }
            ArtifactSource::TrainingFile(instances) => {
                ArtifactStore::require_file(&instances)?;
                self.train_to(config, &instances, destination)
            }
            ArtifactSource::TrainingInstances(rows) => {
                self.train_rows_to(config, &rows, destination)
            }
        }
    }

    fn train_rows_to(
        &self,
        config: &ModelConfiguration,
        rows: &[Vec<FieldValue>],
        destination: &Path,
    ) -> ManagerResult<Materialized> {
        let dump_path = self.store.scratch_path("arff");
        let outcome = InstanceDump::create(&dump_path, &config.attributes, rows)
            .map_err(|err| match err {
                SchemaError::Io(source) => ManagerError::Resource {
                    operation: "write instance dump",
                    path: dump_path.clone(),
                    source,
                },
                other => other.into(),
            })
            .and_then(|dump| self.train_to(config, dump.path(), destination));
        let _ = ArtifactStore::remove(&dump_path);
        outcome
    }

    fn train_to(
        &self,
        config: &ModelConfiguration,
        instances: &Path,
        destination: &Path,
    ) -> ManagerResult<Materialized> {
        let generator = ScriptGenerator::new(config)?;
        let custom = custom_code(config, keys::TRAIN_FILE)?;
        let program = generator.training_script(instances, destination, custom.as_deref())?;
        ArtifactStore::prepare_directory(destination)?;
        let trained = Materialized {
            path: destination.to_path_buf(),
            owned: true,
            header: Some(ArtifactStore::header_path(destination)),
        };
        let outcome = self
            .channel
            .evaluate(&program)
            .map_err(ManagerError::from)
            .and_then(|_| ArtifactStore::require_file(destination))
            .and_then(|()| {
                trained.header.as_deref().map_or(Ok(()), |header| {
                    ArtifactStore::write_header(header, &generator.engine_names())
                })
            });
        if let Err(err) = outcome {
            trained.discard();
            return Err(err);
        }
        let payload = json!({ "instances": instances, "artifact": destination });
        self.log(LogLevel::Info, "model.trained", payload.clone());
        self.event("model.trained", payload);
        Ok(trained)
    }

    /// Moves a pending artifact and its header over the live locations.
    /// A failed move keeps the pending files in use.
    fn promote(&self, pending: Materialized, target: &Path) -> (PathBuf, Option<PathBuf>) {
        if let Err(err) = ArtifactStore::replace(&pending.path, target) {
            self.log(
                LogLevel::Warn,
                "model.promote_failed",
                json!({ "pending": pending.path, "error": err.to_string() }),
            );
            return (pending.path, pending.header);
        }
        let header = pending.header.map(|staged| {
            let live = ArtifactStore::header_path(target);
            match ArtifactStore::replace(&staged, &live) {
                Ok(()) => live,
                Err(_) => staged,
            }
        });
        (target.to_path_buf(), header)
    }

    fn score_locked(
        &self,
        registry: &NamespaceRegistry,
        id: Uuid,
        row: &[FieldValue],
    ) -> ManagerResult<Vec<f64>> {
        let record = registry.get(id).ok_or(ManagerError::UnknownModel(id))?;
        let generator = ScriptGenerator::new(&record.config)?;
        let program = generator.score_invocation(&record.namespace, row)?;
        Ok(self.channel.evaluate(&program)?.into_numbers()?)
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }

    fn event(&self, event_type: &str, payload: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.event(event_type, payload);
        }
    }
}

fn custom_code(config: &ModelConfiguration, key: &str) -> ManagerResult<Option<String>> {
    config
        .property(key)
        .map(|path| ArtifactStore::read_text(Path::new(path), "read engine code"))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs, io::Read, sync::Arc};

    use flate2::read::GzDecoder;
    use rmodels_protocol::{ProtocolError, ProtocolResult};
    use rmodels_schema::Attribute;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    use super::*;

    #[derive(Default)]
    struct EngineState {
        programs: Vec<String>,
        fail_when: Option<String>,
        exports: HashMap<String, PathBuf>,
        prediction: Option<ProtocolResult>,
        closed: bool,
    }

    /// In-memory engine: records programs, writes the files a real engine
    /// would write for `save(...)` and `export.artifact()`.
    #[derive(Clone, Default)]
    struct FakeEngine(Arc<Mutex<EngineState>>);

    impl FakeEngine {
        fn programs(&self) -> Vec<String> {
            self.0.lock().programs.clone()
        }

        fn fail_when(&self, needle: &str) {
            self.0.lock().fail_when = Some(needle.to_string());
        }

        fn heal(&self) {
            self.0.lock().fail_when = None;
        }

        fn count(&self, needle: &str) -> usize {
            self.programs().iter().filter(|p| p.contains(needle)).count()
        }
    }

    fn quoted_after<'p>(program: &'p str, marker: &str) -> Option<&'p str> {
        let start = program.find(marker)? + marker.len();
        let end = program[start..].find('"')? + start;
        Some(&program[start..end])
    }

    impl RSession for FakeEngine {
        fn evaluate(&mut self, program: &str) -> Result<ProtocolResult, ProtocolError> {
            let mut state = self.0.lock();
            state.programs.push(program.to_string());
            if state
                .fail_when
                .as_deref()
                .is_some_and(|needle| program.contains(needle))
            {
                return Err(ProtocolError::Remote("simulated failure".into()));
            }
            if let Some(path) = quoted_after(program, "save(model, file = \"") {
                fs::write(path, b"trained model").unwrap();
            }
            if let Some(line) = program
                .lines()
                .find(|line| line.contains("$export.artifact <- local("))
            {
                let binding = line.split('$').next().unwrap();
                let binding = binding.trim_end_matches("_staged").to_string();
                let path = quoted_after(program, "XML::saveXML(p, file = \"").unwrap();
                state.exports.insert(binding, PathBuf::from(path));
            }
            if let Some(binding) = program.strip_suffix("$export.artifact()") {
                let path = state.exports[binding].clone();
                fs::write(path, b"<PMML version=\"4.4\"/>").unwrap();
            }
            if program.contains("$score(") {
                return Ok(state
                    .prediction
                    .clone()
                    .unwrap_or_else(|| ProtocolResult::NumericVector(vec![0.25, 0.75])));
            }
            Ok(ProtocolResult::Null)
        }

        fn close(&mut self) -> Result<(), ProtocolError> {
            self.0.lock().closed = true;
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), ProtocolError> {
            self.0.lock().closed = true;
            Ok(())
        }
    }

    fn credit() -> ModelConfiguration {
        ModelConfiguration::new(
            vec![
                Attribute::categorical("A1", ["a", "b"]),
                Attribute::numeric("A2"),
                Attribute::categorical("class", ["0", "1"]),
            ],
            IndexMap::new(),
        )
        .with_class_index(2)
    }

    fn rows() -> Vec<Vec<FieldValue>> {
        vec![
            vec!["a".into(), 3.5.into(), "0".into()],
            vec!["b".into(), 1.0.into(), "1".into()],
            vec!["a".into(), 2.5.into(), "0".into()],
            vec!["b".into(), 0.5.into(), "1".into()],
        ]
    }

    fn manager(dir: &Path) -> (ModelManager<FakeEngine>, FakeEngine) {
        let engine = FakeEngine::default();
        let manager = ModelManager::new(engine.clone(), ArtifactStore::new(dir));
        (manager, engine)
    }

    #[test]
    fn explicit_identifier_is_returned() {
        let tmp = tempdir().unwrap();
        let (manager, _) = manager(tmp.path());
        let id = Uuid::new_v4();
        let config = credit().with_property(keys::ID, id.to_string());
        let added = manager
            .add_model(config, ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        assert_eq!(added, id);

        let first = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        let second = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.list_models().len(), 3);
    }

    #[test]
    fn namespace_is_built_staged_then_committed() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        let ns = namespace_name(id);
        let programs = engine.programs();
        assert_eq!(programs.len(), 6);
        assert!(programs[0].contains(&format!("{ns}_staged <- new.env()")));
        assert_eq!(
            programs[1],
            format!("{ns}_staged$attribute.names <- c(\"A1\", \"A2\")")
        );
        assert_eq!(programs[2], format!("{ns}_staged$numeric.columns <- c(2L)"));
        assert_eq!(programs[3], format!("{ns}_staged$factor.columns <- c(1L)"));
        assert!(programs[4].contains(&format!("{ns}_staged$score <- local(")));
        assert!(programs[5].starts_with(&format!("{ns} <- {ns}_staged\n")));
        assert_eq!(
            fs::read(manager.store().root().join(format!("{id}.model"))).unwrap(),
            b"blob"
        );
    }

    #[test]
    fn duplicate_identifier_is_rejected_before_engine_work() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let config = credit().with_property(keys::ID, Uuid::new_v4().to_string());
        manager
            .add_model(config.clone(), ArtifactSource::Bytes(b"one".to_vec()))
            .unwrap();
        let sent = engine.programs().len();
        let err = manager
            .add_model(config, ArtifactSource::Bytes(b"two".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Configuration(_)));
        assert_eq!(engine.programs().len(), sent);
    }

    #[test]
    fn configuration_errors_send_nothing() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let mut config = credit();
        config.properties.shift_remove(keys::CLASS_INDEX);
        let err = manager
            .add_model(config, ArtifactSource::Bytes(b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Configuration(_)));

        let malformed = credit().with_property(keys::ID, "not-a-uuid");
        let err = manager
            .add_model(malformed, ArtifactSource::Bytes(b"x".to_vec()))
            .unwrap_err();
        assert!(err.to_string().contains("not-a-uuid"));
        assert!(engine.programs().is_empty());
    }

    #[test]
    fn failed_namespace_build_leaves_nothing_behind() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = Uuid::new_v4();
        engine.fail_when("$score <- local(");
        let config = credit().with_property(keys::ID, id.to_string());
        let err = manager
            .add_model(config, ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap_err();
        assert!(matches!(&err, ManagerError::RemoteExecution(m) if m == "simulated failure"));
        assert!(manager.list_models().is_empty());
        assert!(!tmp.path().join(format!("{id}.model")).exists());
        let last = engine.programs().pop().unwrap();
        assert!(last.contains(&format!("rm(list = \"{}_staged\")", namespace_name(id))));
    }

    #[test]
    fn referenced_artifact_survives_removal() {
        let tmp = tempdir().unwrap();
        let (manager, _) = manager(tmp.path());
        let external = tmp.path().join("external.rda");
        fs::write(&external, b"shared").unwrap();
        let id = manager
            .add_model(credit(), ArtifactSource::File(external.clone()))
            .unwrap();
        manager.remove_model(id).unwrap();
        assert!(external.exists());

        let missing = manager
            .add_model(credit(), ArtifactSource::File(tmp.path().join("absent.rda")))
            .unwrap_err();
        assert!(matches!(missing, ManagerError::Resource { .. }));
    }

    #[test]
    fn removal_deletes_files_and_namespace() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager.train_and_add(credit(), rows()).unwrap();
        let artifact = tmp.path().join(format!("{id}.model"));
        let header = tmp.path().join(format!("{id}.model.header"));
        let export = tmp.path().join(format!("{id}.pmml"));
        manager
            .export_artifact(id, &tmp.path().join("out.pmml"), false)
            .unwrap();
        assert!(artifact.exists() && header.exists() && export.exists());
        assert_eq!(fs::read_to_string(&header).unwrap(), "A1,A2,class\n");

        manager.remove_model(id).unwrap();
        assert!(!manager.list_models().contains_key(&id));
        assert!(!artifact.exists() && !header.exists() && !export.exists());
        assert!(engine
            .programs()
            .last()
            .unwrap()
            .contains(&format!("rm(list = \"{}\")", namespace_name(id))));
        assert!(matches!(
            manager.remove_model(id),
            Err(ManagerError::UnknownModel(missing)) if missing == id
        ));
    }

    #[test]
    fn training_cleans_up_instance_dump() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let bytes = manager.train(&credit(), &rows()).unwrap();
        assert_eq!(bytes, b"trained model");
        let leftovers = fs::read_dir(tmp.path().join("training")).unwrap().count();
        assert_eq!(leftovers, 0);
        let program = &engine.programs()[0];
        assert!(program.contains("foreign::read.arff("));
        assert!(program.contains("model <- randomForest(formula, data = instances)"));
    }

    #[test]
    fn export_runs_engine_once() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        let first = tmp.path().join("exports/first.pmml");
        let second = tmp.path().join("exports/second.pmml.gz");
        manager.export_artifact(id, &first, false).unwrap();
        manager.export_artifact(id, &second, true).unwrap();
        assert_eq!(engine.count("$export.artifact()"), 1);

        let mut unpacked = Vec::new();
        GzDecoder::new(fs::File::open(&second).unwrap())
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(fs::read(&first).unwrap(), unpacked);

        let unknown = manager
            .export_artifact(Uuid::new_v4(), &first, false)
            .unwrap_err();
        assert!(matches!(unknown, ManagerError::UnknownModel(_)));
    }

    #[test]
    fn failed_reconfigure_keeps_previous_state() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager.train_and_add(credit(), rows()).unwrap();
        let before = manager.list_models();
        let artifact = tmp.path().join(format!("{id}.model"));

        engine.fail_when("$score <- local(");
        let newer = ModelConfiguration::default().with_property(keys::TRAIN_FUNCTION_ARGUMENTS, "ntree = 10");
        let err = manager
            .reconfigure_model(id, &newer, Some(ArtifactSource::TrainingInstances(rows())))
            .unwrap_err();
        assert!(matches!(err, ManagerError::RemoteExecution(_)));
        assert_eq!(manager.list_models(), before);
        assert!(artifact.exists());
        assert!(!ArtifactStore::pending_path(&artifact).exists());
        let live = namespace_name(id);
        assert!(!engine
            .programs()
            .iter()
            .any(|p| p.contains(&format!("rm(list = \"{live}\")"))));

        engine.heal();
        manager
            .reconfigure_model(id, &newer, Some(ArtifactSource::TrainingInstances(rows())))
            .unwrap();
        assert_eq!(
            manager.list_models()[&id].property(keys::TRAIN_FUNCTION_ARGUMENTS),
            Some("ntree = 10")
        );
        assert!(artifact.exists());
        assert!(!ArtifactStore::pending_path(&artifact).exists());
        assert!(ArtifactStore::header_path(&artifact).exists());
    }

    #[test]
    fn reconfigure_invalidates_export_and_rejects_bytes() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        let out = tmp.path().join("out.pmml");
        manager.export_artifact(id, &out, false).unwrap();

        let newer = ModelConfiguration::default()
            .with_property(keys::PREDICT_RESULT_TRANSFORM, "as.vector(r)");
        manager.reconfigure_model(id, &newer, None).unwrap();
        manager.export_artifact(id, &out, false).unwrap();
        assert_eq!(engine.count("$export.artifact()"), 2);

        let err = manager
            .reconfigure_model(id, &newer, Some(ArtifactSource::Bytes(vec![1])))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Unsupported(_)));

        let moved = ModelConfiguration::default().with_property(keys::ID, Uuid::new_v4().to_string());
        assert!(matches!(
            manager.reconfigure_model(id, &moved, None),
            Err(ManagerError::Configuration(_))
        ));
    }

    #[test]
    fn undeletable_export_fails_reconfigure_before_any_engine_work() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let id = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        fs::create_dir(tmp.path().join(format!("{id}.pmml"))).unwrap();
        let sent = engine.programs().len();

        let newer = ModelConfiguration::default()
            .with_property(keys::PREDICT_RESULT_TRANSFORM, "as.vector(r)");
        let err = manager.reconfigure_model(id, &newer, None).unwrap_err();
        assert!(matches!(err, ManagerError::Resource { operation: "delete", .. }));
        assert_eq!(engine.programs().len(), sent);
        assert_eq!(
            manager.list_models()[&id].property(keys::PREDICT_RESULT_TRANSFORM),
            None
        );

        fs::remove_dir(tmp.path().join(format!("{id}.pmml"))).unwrap();
        manager.reconfigure_model(id, &newer, None).unwrap();
        assert_eq!(
            manager.list_models()[&id].property(keys::PREDICT_RESULT_TRANSFORM),
            Some("as.vector(r)")
        );
    }

    #[test]
    fn scoring_rows_of_unknown_model_fails_even_without_rows() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let missing = Uuid::new_v4();
        assert!(matches!(
            manager.score_rows(missing, &[]),
            Err(ManagerError::UnknownModel(id)) if id == missing
        ));
        assert!(engine.programs().is_empty());
    }

    #[test]
    fn scoring_decodes_vectors_per_model() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let first = manager
            .add_model(credit(), ArtifactSource::Bytes(b"one".to_vec()))
            .unwrap();
        let second = manager
            .add_model(credit(), ArtifactSource::Bytes(b"two".to_vec()))
            .unwrap();
        let row: Vec<FieldValue> = vec!["a".into(), 3.5.into()];
        let scores = manager.score(&[second, first], &row).unwrap();
        assert_eq!(scores.keys().copied().collect::<Vec<_>>(), vec![second, first]);
        let sum: f64 = scores[&first].iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(engine
            .programs()
            .contains(&format!("{}$score(c(\"a\", 3.5))", namespace_name(first))));

        let batch = manager
            .score_rows(first, &[row.clone(), vec![FieldValue::Missing, 1.0.into()]])
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert!(engine
            .programs()
            .contains(&format!("{}$score(c(NA, 1.0))", namespace_name(first))));

        let mut by_model = IndexMap::new();
        by_model.insert(first, row.clone());
        assert_eq!(manager.score_map(&by_model).unwrap().len(), 1);

        assert!(matches!(
            manager.score_one(Uuid::new_v4(), &row),
            Err(ManagerError::UnknownModel(_))
        ));
        assert!(matches!(
            manager.score_one(first, &[FieldValue::from("a")]),
            Err(ManagerError::Configuration(_))
        ));

        engine.0.lock().prediction = Some(ProtocolResult::Text("oops".into()));
        assert!(matches!(
            manager.score_one(first, &row),
            Err(ManagerError::Protocol(ProtocolError::UnexpectedResult { .. }))
        ));
    }

    #[test]
    fn close_tears_down_every_namespace() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let first = manager
            .add_model(credit(), ArtifactSource::Bytes(b"one".to_vec()))
            .unwrap();
        manager
            .add_model(credit(), ArtifactSource::Bytes(b"two".to_vec()))
            .unwrap();
        manager.close().unwrap();
        assert!(manager.list_models().is_empty());
        assert_eq!(engine.count("inherits = FALSE)) rm(list = "), 2);
        assert!(engine.0.lock().closed);
        assert!(tmp.path().join(format!("{first}.model")).exists());
    }

    #[test]
    fn lifecycle_events_are_published() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = ManagerTelemetry::builder("rmodels.manager")
            .log_path(tmp.path().join("manager.log"))
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let (manager, engine) = manager(tmp.path());
        let manager = manager.with_telemetry(telemetry);
        let id = manager
            .add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        engine.fail_when("new.env()");
        let _ = manager.add_model(credit(), ArtifactSource::Bytes(b"blob".to_vec()));
        engine.heal();
        manager.remove_model(id).unwrap();
        assert_eq!(bus.events_of_type("model.added").len(), 1);
        assert_eq!(bus.events_of_type("model.add_failed").len(), 1);
        assert_eq!(bus.events_of_type("model.removed").len(), 1);
        let log = fs::read_to_string(tmp.path().join("manager.log")).unwrap();
        assert!(log.contains("model.add_failed"));
    }

    #[test]
    fn custom_prediction_code_is_read_from_disk() {
        let tmp = tempdir().unwrap();
        let (manager, engine) = manager(tmp.path());
        let code = tmp.path().join("predict.R");
        fs::write(&code, "postprocess <- function(r) r\r\n").unwrap();
        let config = credit().with_property(keys::PREDICT_FILE, code.to_string_lossy());
        manager
            .add_model(config, ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap();
        assert_eq!(engine.count("  postprocess <- function(r) r\n"), 1);

        let missing = credit().with_property(keys::PREDICT_FILE, "/nonexistent/predict.R");
        let err = manager
            .add_model(missing, ArtifactSource::Bytes(b"blob".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ManagerError::Resource { operation: "read engine code", .. }));
    }
}
