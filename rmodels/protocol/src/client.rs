use std::{
    io::{Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use serde::Serialize;
use serde_json::json;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use crate::{
    codec::{self, Param, ID_BLOCK_LEN},
    error::ProtocolError,
    qap,
    result::ProtocolResult,
    session::RSession,
};

/// Symbol the program text is bound to before evaluation.
pub const PROGRAM_SYMBOL: &str = ".rmodels.program";

/// Byte stream an [`RserveClient`] talks over.
pub trait Transport: Read + Write + Send {
    /// Releases the underlying connection.
    fn disconnect(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn disconnect(&mut self) -> std::io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Server identification from the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Protocol version, e.g. `0103`.
    pub version: String,
    /// Capability attributes advertised after the protocol name.
    pub attributes: Vec<String>,
}

impl ServerInfo {
    /// Parses the 32-byte identification block.
    pub fn parse(block: &[u8; ID_BLOCK_LEN]) -> Result<Self, ProtocolError> {
        if &block[0..4] != b"Rsrv" {
            return Err(ProtocolError::Handshake(
                "peer is not an Rserve server".to_string(),
            ));
        }
        if &block[8..12] != b"QAP1" {
            return Err(ProtocolError::Handshake(format!(
                "unsupported protocol {}",
                String::from_utf8_lossy(&block[8..12])
            )));
        }
        let version = String::from_utf8_lossy(&block[4..8]).into_owned();
        let attributes: Vec<String> = block[12..]
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).trim().to_string())
            .filter(|attribute| !attribute.is_empty() && !attribute.chars().all(|c| c == '-'))
            .collect();
        if attributes.iter().any(|a| a == "ARpt" || a == "ARuc") {
            return Err(ProtocolError::Handshake(
                "server requires authentication, which is not supported".to_string(),
            ));
        }
        Ok(Self {
            version,
            attributes,
        })
    }
}

/// One connection to an Rserve engine.
pub struct RserveClient<T: Transport> {
    transport: T,
    server: ServerInfo,
    logger: Option<Arc<JsonLogger>>,
    open: bool,
}

impl RserveClient<TcpStream> {
    /// Connects to `addr` and performs the handshake.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Self::handshake(stream)
    }

    /// Connects with a timeout applied to connecting and to the handshake.
    ///
    /// Evaluations on the returned client block until the engine answers.
    pub fn connect_timeout(
        addr: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let mut last_error = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(timeout))?;
                    let client = Self::handshake(stream)?;
                    client.transport.set_read_timeout(None)?;
                    return Ok(client);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.map_or_else(
            || ProtocolError::Handshake("address resolved to nothing".to_string()),
            ProtocolError::Io,
        ))
    }
}

impl<T: Transport> RserveClient<T> {
    /// Reads the identification block from an already open transport.
    pub fn handshake(mut transport: T) -> Result<Self, ProtocolError> {
        let mut block = [0u8; ID_BLOCK_LEN];
        transport.read_exact(&mut block)?;
        let server = ServerInfo::parse(&block)?;
        Ok(Self {
            transport,
            server,
            logger: None,
            open: true,
        })
    }

    /// Logs every submitted program at trace level.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<JsonLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Identification received during the handshake.
    #[must_use]
    pub const fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    fn request(&mut self, command: i32, params: &[Param<'_>]) -> Result<Vec<u8>, ProtocolError> {
        if !self.open {
            return Err(ProtocolError::Closed);
        }
        let outcome = codec::write_request(&mut self.transport, command, params)
            .and_then(|()| codec::read_response(&mut self.transport, command));
        if let Err(ProtocolError::Io(_)) = &outcome {
            self.open = false;
        }
        outcome
    }

    fn trace(&self, program: &str) {
        if let Some(logger) = &self.logger {
            if logger.enabled(LogLevel::Trace) {
                let record = LogRecord::new("protocol", LogLevel::Trace, "evaluate")
                    .with_metadata(json!({ "program": program }));
                // A failing trace sink must not fail the evaluation.
                let _ = logger.log(&record);
            }
        }
    }
}

impl<T: Transport> RSession for RserveClient<T> {
    fn evaluate(&mut self, program: &str) -> Result<ProtocolResult, ProtocolError> {
        self.trace(program);
        self.request(
            qap::CMD_SET_SEXP,
            &[Param::Text(PROGRAM_SYMBOL), Param::Text(program)],
        )?;
        let wrapped = format!("try(eval(parse(text = {PROGRAM_SYMBOL})), silent = TRUE)");
        let payload = self.request(qap::CMD_EVAL, &[Param::Text(&wrapped)])?;
        let rexp = codec::decode_sexp_payload(&payload)?;
        ProtocolResult::from_rexp(&rexp)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.transport.disconnect()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ProtocolError> {
        match self.request(qap::CMD_SHUTDOWN, &[]) {
            Ok(_) | Err(ProtocolError::Io(_)) => {}
            Err(err) => return Err(err),
        }
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        codec::tests::{response, sexp_param},
        rexp::tests::{doubles, sexp, strings, with_attributes},
    };

    struct ScriptedTransport {
        incoming: Cursor<Vec<u8>>,
        outgoing: Vec<u8>,
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.outgoing.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {}

    fn id_block(attributes: &str) -> Vec<u8> {
        let mut block = format!("Rsrv0103QAP1{attributes}").into_bytes();
        block.resize(ID_BLOCK_LEN, b'-');
        block[ID_BLOCK_LEN - 2..].copy_from_slice(b"\r\n");
        block
    }

    fn client(replies: &[Vec<u8>]) -> RserveClient<ScriptedTransport> {
        let mut incoming = id_block("\r\n\r\n");
        for reply in replies {
            incoming.extend_from_slice(reply);
        }
        RserveClient::handshake(ScriptedTransport {
            incoming: Cursor::new(incoming),
            outgoing: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn parses_identification_block() {
        let block: [u8; ID_BLOCK_LEN] = id_block("\r\n\r\n").try_into().unwrap();
        let info = ServerInfo::parse(&block).unwrap();
        assert_eq!(info.version, "0103");
    }

    #[test]
    fn refuses_authenticating_servers() {
        let block: [u8; ID_BLOCK_LEN] = id_block("ARpt").try_into().unwrap();
        assert!(matches!(
            ServerInfo::parse(&block),
            Err(ProtocolError::Handshake(_))
        ));
    }

    #[test]
    fn evaluate_binds_program_then_evaluates() {
        let value = sexp_param(&sexp(qap::XT_ARRAY_DOUBLE, &doubles(&[0.2, 0.8])));
        let mut session = client(&[response(qap::RESP_OK, &[]), response(qap::RESP_OK, &value)]);
        let result = session.evaluate("predict(model, v)").unwrap();
        assert_eq!(result, ProtocolResult::NumericVector(vec![0.2, 0.8]));

        let sent = &session.transport.outgoing;
        assert_eq!(&sent[..4], &qap::CMD_SET_SEXP.to_le_bytes());
        let text = String::from_utf8_lossy(sent);
        assert!(text.contains(PROGRAM_SYMBOL));
        assert!(text.contains("predict(model, v)"));
        assert!(text.contains("try(eval(parse(text = .rmodels.program)), silent = TRUE)"));
    }

    #[test]
    fn evaluate_surfaces_engine_errors() {
        let class = sexp(qap::XT_ARRAY_STR, &strings(&["try-error"]));
        let error = with_attributes(
            qap::XT_ARRAY_STR,
            &[("class", class)],
            &strings(&["Error : object 'x' not found\n"]),
        );
        let mut session = client(&[
            response(qap::RESP_OK, &[]),
            response(qap::RESP_OK, &sexp_param(&error)),
        ]);
        let err = session.evaluate("x").unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(message) if message.contains("'x' not found")));
    }

    #[test]
    fn server_errors_keep_the_connection_open() {
        let mut session = client(&[response(qap::RESP_ERR | (0x44 << 24), &[])]);
        let err = session.evaluate("1").unwrap_err();
        assert!(matches!(err, ProtocolError::Server { code: 0x44, .. }));
        assert!(session.is_open());
    }

    #[test]
    fn closed_session_rejects_requests() {
        let mut session = client(&[]);
        session.close().unwrap();
        assert!(matches!(session.evaluate("1"), Err(ProtocolError::Closed)));
        session.close().unwrap();
    }

    #[test]
    fn slow_evaluations_outlive_the_connect_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let engine = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&id_block("\r\n\r\n")).unwrap();
            let value = sexp_param(&sexp(qap::XT_ARRAY_DOUBLE, &doubles(&[1.0])));
            for reply in [response(qap::RESP_OK, &[]), response(qap::RESP_OK, &value)] {
                let mut header = [0u8; codec::HEADER_LEN];
                stream.read_exact(&mut header).unwrap();
                let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
                let mut body = vec![0u8; usize::try_from(len).unwrap()];
                stream.read_exact(&mut body).unwrap();
                std::thread::sleep(Duration::from_millis(300));
                stream.write_all(&reply).unwrap();
            }
        });

        let mut session =
            RserveClient::connect_timeout(address, Duration::from_millis(100)).unwrap();
        let result = session.evaluate("Sys.sleep(1); 1").unwrap();
        assert_eq!(result, ProtocolResult::NumericVector(vec![1.0]));
        assert!(session.is_open());
        engine.join().unwrap();
    }

    #[test]
    fn shutdown_tolerates_dropped_connection() {
        let mut session = client(&[]);
        session.shutdown().unwrap();
        assert!(!session.is_open());
        assert_eq!(&session.transport.outgoing[..4], &qap::CMD_SHUTDOWN.to_le_bytes());
    }
}
