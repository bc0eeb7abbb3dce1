use std::path::Path;

use parking_lot::Mutex;

use crate::{
    error::ProtocolError,
    literal::{symbol, RLiteral},
    result::ProtocolResult,
};

/// Operations available on an engine session.
///
/// Only [`RSession::evaluate`], [`RSession::close`] and
/// [`RSession::shutdown`] touch the wire; everything else is expressed as
/// program text so alternative sessions get it for free.
pub trait RSession: Send {
    /// Evaluates `program` and classifies its value.
    fn evaluate(&mut self, program: &str) -> Result<ProtocolResult, ProtocolError>;

    /// Releases the connection. Calling it twice is harmless.
    fn close(&mut self) -> Result<(), ProtocolError>;

    /// Asks the engine process to terminate, then closes.
    fn shutdown(&mut self) -> Result<(), ProtocolError>;

    /// Evaluates the contents of a script file with line endings normalized.
    fn load_script(&mut self, path: &Path) -> Result<ProtocolResult, ProtocolError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProtocolError::Script {
            path: path.to_path_buf(),
            source,
        })?;
        self.evaluate(&text.replace("\r\n", "\n"))
    }

    /// Removes every binding from the global environment.
    fn reset_all(&mut self) -> Result<(), ProtocolError> {
        self.evaluate("rm(list = ls(all.names = TRUE))").map(|_| ())
    }

    /// Binds `namespace$variable` to a character vector.
    fn assign_string_list(
        &mut self,
        variable: &str,
        namespace: &str,
        values: &[String],
    ) -> Result<(), ProtocolError> {
        let program = format!(
            "{}${} <- {}",
            symbol(namespace),
            symbol(variable),
            RLiteral::text_vector(values)
        );
        self.evaluate(&program).map(|_| ())
    }

    /// Binds `namespace$variable` to an integer vector.
    fn assign_int_list(
        &mut self,
        variable: &str,
        namespace: &str,
        values: &[i64],
    ) -> Result<(), ProtocolError> {
        let literals: Vec<RLiteral> = values.iter().copied().map(RLiteral::Integer).collect();
        let program = format!(
            "{}${} <- {}",
            symbol(namespace),
            symbol(variable),
            RLiteral::vector(&literals)
        );
        self.evaluate(&program).map(|_| ())
    }
}

/// Serialized access to one session.
///
/// Every caller goes through the mutex, so programs from concurrent callers
/// never interleave on the connection. Multi-step sequences that must not be
/// split run inside [`EngineChannel::with_session`].
pub struct EngineChannel<S> {
    session: Mutex<S>,
}

impl<S: RSession> EngineChannel<S> {
    /// Wraps a session.
    pub fn new(session: S) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }

    /// Evaluates one program.
    pub fn evaluate(&self, program: &str) -> Result<ProtocolResult, ProtocolError> {
        self.session.lock().evaluate(program)
    }

    /// Runs `f` with exclusive access to the session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.session.lock();
        f(&mut *guard)
    }

    /// Closes the session.
    pub fn close(&self) -> Result<(), ProtocolError> {
        self.session.lock().close()
    }

    /// Terminates the engine process.
    pub fn shutdown(&self) -> Result<(), ProtocolError> {
        self.session.lock().shutdown()
    }

    /// Returns the wrapped session.
    pub fn into_inner(self) -> S {
        self.session.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Arc, thread};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        programs: Vec<String>,
        closed: bool,
    }

    impl RSession for Recorder {
        fn evaluate(&mut self, program: &str) -> Result<ProtocolResult, ProtocolError> {
            self.programs.push(program.to_string());
            Ok(ProtocolResult::Null)
        }

        fn close(&mut self) -> Result<(), ProtocolError> {
            self.closed = true;
            Ok(())
        }

        fn shutdown(&mut self) -> Result<(), ProtocolError> {
            self.close()
        }
    }

    #[test]
    fn assigns_lists_with_quoted_literals() {
        let mut session = Recorder::default();
        session
            .assign_string_list("attribute.names", "m1", &["A1".into(), "say \"x\"".into()])
            .unwrap();
        session.assign_int_list("numeric.columns", "m1", &[2, 3]).unwrap();
        assert_eq!(
            session.programs,
            vec![
                r#"m1$attribute.names <- c("A1", "say \"x\"")"#.to_string(),
                "m1$numeric.columns <- c(2L, 3L)".to_string(),
            ]
        );
    }

    #[test]
    fn load_script_normalizes_line_endings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a <- 1\r\nb <- 2\r\n").unwrap();
        let mut session = Recorder::default();
        session.load_script(file.path()).unwrap();
        assert_eq!(session.programs, vec!["a <- 1\nb <- 2\n".to_string()]);
    }

    #[test]
    fn load_script_reports_missing_file() {
        let mut session = Recorder::default();
        let err = session
            .load_script(Path::new("/nonexistent/score.R"))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Script { .. }));
    }

    #[test]
    fn channel_serializes_callers() {
        let channel = Arc::new(EngineChannel::new(Recorder::default()));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    channel.with_session(|session| {
                        session.evaluate(&format!("begin {worker}")).unwrap();
                        session.evaluate(&format!("end {worker}")).unwrap();
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let channel = Arc::try_unwrap(channel).ok().unwrap();
        let programs = channel.into_inner().programs;
        assert_eq!(programs.len(), 8);
        for pair in programs.chunks(2) {
            let worker = pair[0].trim_start_matches("begin ");
            assert_eq!(pair[1], format!("end {worker}"));
        }
    }

    #[test]
    fn reset_and_close_go_through_the_channel() {
        let channel = EngineChannel::new(Recorder::default());
        channel.with_session(|session| session.reset_all()).unwrap();
        channel.close().unwrap();
        let session = channel.into_inner();
        assert!(session.closed);
        assert_eq!(session.programs, vec!["rm(list = ls(all.names = TRUE))"]);
    }
}
