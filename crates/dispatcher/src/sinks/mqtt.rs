//! MqttSink - MQTT 3.1.1 publish over TCP or TLS
//!
//! Each publish opens a fresh connection: CONNECT, wait for CONNACK, one
//! QoS 0 PUBLISH per record, DISCONNECT. The whole exchange, including the
//! TLS handshake, shares one timeout.

use std::sync::Arc;
use std::time::Duration;

use contracts::{positive_duration, ContractError, MqttOptions, Record, RecordSink, TlsOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument};

/// Sink that publishes every record of a sample to a common topic
pub struct MqttSink {
    name: String,
    options: MqttOptions,
    timeout: Duration,
    tls: Option<TlsSettings>,
}

struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl MqttSink {
    /// # Errors
    /// [`ContractError::Destination`] if the timeout is not a positive number
    /// of seconds, or the TLS trust store cannot be built from `ca_certs`.
    pub fn new(name: impl Into<String>, options: MqttOptions) -> Result<Self, ContractError> {
        let name = name.into();
        let timeout = positive_duration(options.timeout_s).ok_or_else(|| {
            ContractError::destination(&name, format!("invalid timeout_s {}", options.timeout_s))
        })?;
        let tls = options
            .tls
            .as_ref()
            .map(|tls| TlsSettings::load(&name, &options.hostname, tls))
            .transpose()?;

        Ok(Self {
            name,
            options,
            timeout,
            tls,
        })
    }

    fn broker_addr(&self) -> String {
        format!("{}:{}", self.options.hostname, self.options.port)
    }

    fn err(&self, message: impl Into<String>) -> ContractError {
        ContractError::destination(&self.name, message)
    }

    async fn exchange(&self, records: &[Record]) -> Result<(), ContractError> {
        let addr = self.broker_addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| self.err(format!("connect to {addr} failed: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(sink = %self.name, error = %e, "TCP_NODELAY not applied");
        }

        match &self.tls {
            Some(tls) => {
                let stream = tls
                    .connector
                    .connect(tls.server_name.clone(), stream)
                    .await
                    .map_err(|e| self.err(format!("TLS handshake with {addr} failed: {e}")))?;
                debug!(sink = %self.name, broker = %addr, "TLS session established");
                self.session(stream, &addr, records).await
            }
            None => self.session(stream, &addr, records).await,
        }
    }

    async fn session<S>(
        &self,
        mut stream: S,
        addr: &str,
        records: &[Record],
    ) -> Result<(), ContractError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connect = packet::connect(
            &self.options.client_id,
            self.options.keepalive_s,
            self.options.auth.as_ref(),
        )
        .map_err(|e| self.err(e))?;
        stream
            .write_all(&connect)
            .await
            .map_err(|e| self.err(format!("CONNECT write failed: {e}")))?;

        let mut connack = [0u8; 4];
        stream
            .read_exact(&mut connack)
            .await
            .map_err(|e| self.err(format!("CONNACK read failed: {e}")))?;
        packet::check_connack(&connack).map_err(|e| self.err(e))?;
        debug!(sink = %self.name, broker = %addr, "Broker accepted connection");

        for record in records {
            let payload = serde_json::to_vec(record)
                .map_err(|e| self.err(format!("record serialization failed: {e}")))?;
            let publish =
                packet::publish(&self.options.topic, &payload).map_err(|e| self.err(e))?;
            stream
                .write_all(&publish)
                .await
                .map_err(|e| self.err(format!("PUBLISH write failed: {e}")))?;
        }

        stream
            .write_all(&packet::DISCONNECT)
            .await
            .map_err(|e| self.err(format!("DISCONNECT write failed: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| self.err(format!("socket shutdown failed: {e}")))?;
        Ok(())
    }
}

impl TlsSettings {
    /// Trust store from the PEM bundle at `ca_certs`, verified against `hostname`
    fn load(name: &str, hostname: &str, tls: &TlsOptions) -> Result<Self, ContractError> {
        let fail = |message: String| ContractError::destination(name, message);

        let mut roots = RootCertStore::empty();
        let certs = CertificateDer::pem_file_iter(&tls.ca_certs)
            .map_err(|e| fail(format!("cannot read ca_certs '{}': {e}", tls.ca_certs)))?;
        for cert in certs {
            let cert =
                cert.map_err(|e| fail(format!("bad certificate in '{}': {e}", tls.ca_certs)))?;
            roots
                .add(cert)
                .map_err(|e| fail(format!("unusable certificate in '{}': {e}", tls.ca_certs)))?;
        }
        if roots.is_empty() {
            return Err(fail(format!("no certificates found in '{}'", tls.ca_certs)));
        }

        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| fail(format!("TLS setup failed: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| fail(format!("invalid TLS server name '{hostname}': {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }
}

impl RecordSink for MqttSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "mqtt_sink_publish",
        skip(self, records),
        fields(sink = %self.name, topic = %self.options.topic, records = records.len())
    )]
    async fn publish(&self, records: &[Record]) -> Result<(), ContractError> {
        if records.is_empty() {
            return Ok(());
        }

        tokio::time::timeout(self.timeout, self.exchange(records))
            .await
            .map_err(|_| self.err(format!("broker exchange timed out after {:?}", self.timeout)))??;

        info!(
            sink = %self.name,
            records = records.len(),
            "Sent records to mqtt broker for publishing"
        );
        Ok(())
    }
}

/// MQTT 3.1.1 control packets, client side, QoS 0 only
pub(crate) mod packet {
    use bytes::{BufMut, Bytes, BytesMut};
    use contracts::MqttAuth;

    const CONNECT: u8 = 0x10;
    const CONNACK: u8 = 0x20;
    const PUBLISH_QOS0: u8 = 0x30;
    const PROTOCOL_LEVEL_311: u8 = 4;

    const FLAG_CLEAN_SESSION: u8 = 0x02;
    const FLAG_PASSWORD: u8 = 0x40;
    const FLAG_USERNAME: u8 = 0x80;

    pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

    pub const DISCONNECT: [u8; 2] = [0xE0, 0x00];

    /// Variable-length "remaining length" field
    pub fn put_remaining_length(buf: &mut BytesMut, mut len: usize) -> Result<(), String> {
        if len > MAX_REMAINING_LENGTH {
            return Err(format!(
                "packet of {len} bytes exceeds the MQTT limit of {MAX_REMAINING_LENGTH}"
            ));
        }
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            buf.put_u8(byte);
            if len == 0 {
                return Ok(());
            }
        }
    }

    fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), String> {
        let len = u16::try_from(s.len())
            .map_err(|_| format!("string field of {} bytes is too long", s.len()))?;
        buf.put_u16(len);
        buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn str_len(s: &str) -> usize {
        2 + s.len()
    }

    pub fn connect(
        client_id: &str,
        keepalive_s: u16,
        auth: Option<&MqttAuth>,
    ) -> Result<Bytes, String> {
        let mut flags = FLAG_CLEAN_SESSION;
        let mut payload_len = str_len(client_id);
        if let Some(auth) = auth {
            flags |= FLAG_USERNAME;
            payload_len += str_len(&auth.username);
            if !auth.password.is_empty() {
                flags |= FLAG_PASSWORD;
                payload_len += str_len(&auth.password);
            }
        }

        // protocol name + level + flags + keepalive
        let variable_len = str_len("MQTT") + 1 + 1 + 2;
        let remaining = variable_len + payload_len;

        let mut buf = BytesMut::with_capacity(remaining + 5);
        buf.put_u8(CONNECT);
        put_remaining_length(&mut buf, remaining)?;
        put_str(&mut buf, "MQTT")?;
        buf.put_u8(PROTOCOL_LEVEL_311);
        buf.put_u8(flags);
        buf.put_u16(keepalive_s);
        put_str(&mut buf, client_id)?;
        if let Some(auth) = auth {
            put_str(&mut buf, &auth.username)?;
            if !auth.password.is_empty() {
                put_str(&mut buf, &auth.password)?;
            }
        }
        Ok(buf.freeze())
    }

    pub fn check_connack(frame: &[u8; 4]) -> Result<(), String> {
        if frame[0] != CONNACK || frame[1] != 0x02 {
            return Err(format!(
                "expected CONNACK, got packet type 0x{:02X} length {}",
                frame[0], frame[1]
            ));
        }
        match frame[3] {
            0 => Ok(()),
            1 => Err("connection refused: unacceptable protocol version".to_string()),
            2 => Err("connection refused: identifier rejected".to_string()),
            3 => Err("connection refused: server unavailable".to_string()),
            4 => Err("connection refused: bad user name or password".to_string()),
            5 => Err("connection refused: not authorized".to_string()),
            code => Err(format!("connection refused: return code {code}")),
        }
    }

    pub fn publish(topic: &str, payload: &[u8]) -> Result<Bytes, String> {
        let remaining = str_len(topic) + payload.len();
        let mut buf = BytesMut::with_capacity(remaining + 5);
        buf.put_u8(PUBLISH_QOS0);
        put_remaining_length(&mut buf, remaining)?;
        put_str(&mut buf, topic)?;
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}
