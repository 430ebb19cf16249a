//! Alert delivery.
//!
//! The engine hands every finding and operational error to an
//! [`AlertRouter`], which fans it out to the configured channels: an AlertR
//! named pipe, SMTP mail, or, when neither is configured, standard output.

use anyhow::{anyhow, bail, Context};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::settings::AlertSettings;

const SEPARATOR_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Error,
    Finding,
}

impl AlertKind {
    fn label(self) -> &'static str {
        match self {
            AlertKind::Error => "Error",
            AlertKind::Finding => "Finding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub script: String,
    pub host: String,
    pub message: String,
}

impl Alert {
    /// Body for remote channels, where the reader needs the host.
    pub fn remote_body(&self) -> String {
        format!(
            "{} in '{}' on host '{}':\n{}",
            self.kind.label(),
            self.script,
            self.host,
            self.message
        )
    }

    pub fn subject(&self) -> String {
        format!(
            "[Security] {} in '{}' on host '{}'",
            self.kind.label(),
            self.script,
            self.host
        )
    }
}

pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Attempt budget for channels that talk to another process.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

impl Retry {
    fn run<T>(&self, what: &str, mut op: impl FnMut() -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut last = None;
        for attempt in 1..=self.attempts.max(1) {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("{what} attempt {attempt} failed: {e:#}");
                    last = Some(e);
                    if attempt < self.attempts {
                        std::thread::sleep(self.delay);
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| anyhow!("{what} not attempted")))
    }
}

// ── stdout ──────────────────────────────────────────────────────────────────

pub struct StdoutSink;

impl StdoutSink {
    pub fn render(alert: &Alert) -> String {
        format!(
            "{}\n{} in '{}':\n{}",
            "#".repeat(SEPARATOR_WIDTH),
            alert.kind.label(),
            alert.script,
            alert.message
        )
    }
}

impl AlertSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", Self::render(alert))?;
        out.flush()?;
        Ok(())
    }
}

// ── AlertR named pipe ───────────────────────────────────────────────────────

pub struct FifoSink {
    path: PathBuf,
    retry: Retry,
    /// Pause after a successful write so the sensor can parse messages one at a time.
    settle: Duration,
}

impl FifoSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            retry: Retry::default(),
            settle: Duration::from_secs(2),
        }
    }

    pub fn with_timing(mut self, retry: Retry, settle: Duration) -> Self {
        self.retry = retry;
        self.settle = settle;
        self
    }

    /// The sensor-alert envelope AlertR's FIFO sensor expects.
    pub fn envelope(alert: &Alert) -> serde_json::Value {
        let flag = match alert.kind {
            AlertKind::Error => "error",
            AlertKind::Finding => "finding",
        };
        let mut optional = serde_json::Map::new();
        optional.insert(flag.into(), serde_json::Value::Bool(true));
        optional.insert("script".into(), alert.script.clone().into());
        optional.insert("hostname".into(), alert.host.clone().into());
        optional.insert("message".into(), alert.remote_body().into());

        serde_json::json!({
            "message": "sensoralert",
            "payload": {
                "state": 1,
                "dataType": 0,
                "data": {},
                "hasLatestData": false,
                "changeState": false,
                "hasOptionalData": true,
                "optionalData": optional,
            }
        })
    }

    fn write_once(&self, line: &[u8]) -> anyhow::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true);
        #[cfg(unix)]
        {
            // Fail with ENXIO instead of blocking when no reader is attached.
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NONBLOCK);
        }
        let mut fifo = options
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        fifo.write_all(line)?;
        Ok(())
    }
}

impl AlertSink for FifoSink {
    fn name(&self) -> &'static str {
        "alertr-fifo"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&Self::envelope(alert))?;
        line.push(b'\n');
        self.retry.run("fifo write", || self.write_once(&line))?;
        std::thread::sleep(self.settle);
        Ok(())
    }
}

// ── SMTP ────────────────────────────────────────────────────────────────────

pub struct MailSink {
    server: String,
    from: String,
    to: String,
    retry: Retry,
    timeout: Duration,
}

impl MailSink {
    pub fn new(server: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            from: from.into(),
            to: to.into(),
            retry: Retry::default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Header block plus dot-stuffed body, terminated for the DATA phase.
    pub fn compose(&self, alert: &Alert) -> String {
        let mut data = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n",
            self.from,
            self.to,
            alert.subject()
        );
        for line in alert.remote_body().lines() {
            if line.starts_with('.') {
                data.push('.');
            }
            data.push_str(line);
            data.push_str("\r\n");
        }
        data.push_str(".\r\n");
        data
    }

    fn send_once(&self, alert: &Alert) -> anyhow::Result<()> {
        let addr = self
            .server
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("cannot resolve {}", self.server))?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = stream;

        expect_reply(&mut reader, &[220])?;
        command(&mut writer, &mut reader, &format!("HELO {}", alert.host), &[250])?;
        command(&mut writer, &mut reader, &format!("MAIL FROM:<{}>", self.from), &[250])?;
        command(&mut writer, &mut reader, &format!("RCPT TO:<{}>", self.to), &[250, 251])?;
        command(&mut writer, &mut reader, "DATA", &[354])?;
        writer.write_all(self.compose(alert).as_bytes())?;
        expect_reply(&mut reader, &[250])?;
        command(&mut writer, &mut reader, "QUIT", &[221])?;
        Ok(())
    }
}

fn command<R: BufRead, W: Write>(
    writer: &mut W,
    reader: &mut R,
    line: &str,
    accepted: &[u16],
) -> anyhow::Result<()> {
    write!(writer, "{line}\r\n")?;
    writer.flush()?;
    expect_reply(reader, accepted)
}

/// Read one (possibly multi-line) SMTP reply and check its code.
fn expect_reply<R: BufRead>(reader: &mut R, accepted: &[u16]) -> anyhow::Result<()> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            bail!("connection closed by server");
        }
        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| anyhow!("malformed reply: {}", line.trim_end()))?;
        // "250-" continues, "250 " ends the reply.
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        if accepted.contains(&code) {
            return Ok(());
        }
        bail!("unexpected reply: {}", line.trim_end());
    }
}

impl AlertSink for MailSink {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        self.retry.run("smtp delivery", || self.send_once(alert))
    }
}

// ── in-memory capture ───────────────────────────────────────────────────────

/// Keeps delivered alerts in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct RecordingSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

// ── router ──────────────────────────────────────────────────────────────────

pub struct AlertRouter {
    host: String,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl AlertRouter {
    pub fn from_settings(settings: &AlertSettings) -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
        if let Some(fifo) = &settings.fifo {
            sinks.push(Box::new(FifoSink::new(fifo.clone())));
        }
        if let Some((from, to)) = settings.mail() {
            sinks.push(Box::new(MailSink::new(settings.smtp_server.clone(), from, to)));
        }
        if sinks.is_empty() {
            sinks.push(Box::new(StdoutSink));
        }
        Self::with_sinks(hostname(), sinks)
    }

    pub fn with_sinks(host: impl Into<String>, sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self {
            host: host.into(),
            sinks,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn alert(&self, kind: AlertKind, script: &str, message: impl Into<String>) -> Alert {
        Alert {
            kind,
            script: script.to_string(),
            host: self.host.clone(),
            message: message.into(),
        }
    }

    /// Deliver to every channel. A failing channel is logged and skipped.
    /// Returns how many channels accepted the alert.
    pub fn dispatch(&self, alert: &Alert) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            match sink.deliver(alert) {
                Ok(()) => delivered += 1,
                Err(e) => error!(
                    "alert channel {} failed for {}: {e:#}",
                    sink.name(),
                    alert.script
                ),
            }
        }
        if delivered == 0 {
            warn!("{} alert from {} was not delivered", alert.kind.label(), alert.script);
        }
        delivered
    }

    pub fn error(&self, script: &str, message: impl Into<String>) -> usize {
        self.dispatch(&self.alert(AlertKind::Error, script, message))
    }

    pub fn finding(&self, script: &str, message: impl Into<String>) -> usize {
        self.dispatch(&self.alert(AlertKind::Finding, script, message))
    }

    /// Send a test finding through every configured channel, so an operator
    /// can check delivery before relying on it from a timer.
    pub fn test_alert(&self) -> usize {
        let message = format!("Alert test on host '{}'.", self.host);
        self.finding(TEST_ALERT, message)
    }
}

/// Script name carried by [`AlertRouter::test_alert`].
pub const TEST_ALERT: &str = "test_alert";

/// Name of this host as reported in every alert.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    fn finding() -> Alert {
        Alert {
            kind: AlertKind::Finding,
            script: "monitor_passwd".into(),
            host: "web01".into(),
            message: "User 'mallory' was added.".into(),
        }
    }

    #[test]
    fn stdout_rendering_has_separator_and_script() {
        let text = StdoutSink::render(&finding());
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("#".repeat(80).as_str()));
        assert_eq!(lines.next(), Some("Finding in 'monitor_passwd':"));
        assert_eq!(lines.next(), Some("User 'mallory' was added."));
    }

    #[test]
    fn fifo_envelope_layout() {
        let value = FifoSink::envelope(&finding());
        assert_eq!(value["message"], "sensoralert");
        let payload = &value["payload"];
        assert_eq!(payload["state"], 1);
        assert_eq!(payload["dataType"], 0);
        assert_eq!(payload["hasOptionalData"], true);
        assert_eq!(payload["optionalData"]["finding"], true);
        assert_eq!(payload["optionalData"]["script"], "monitor_passwd");
        assert_eq!(payload["optionalData"]["hostname"], "web01");
        assert!(payload["optionalData"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Finding in 'monitor_passwd' on host 'web01':"));
    }

    #[test]
    fn fifo_delivery_fails_after_retries_without_target() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FifoSink::new(dir.path().join("missing.fifo")).with_timing(
            Retry {
                attempts: 2,
                delay: Duration::from_millis(1),
            },
            Duration::ZERO,
        );
        assert!(sink.deliver(&finding()).is_err());
    }

    #[test]
    fn mail_body_is_dot_stuffed() {
        let sink = MailSink::new("127.0.0.1:25", "guard@web01", "ops@example.org");
        let mut alert = finding();
        alert.message = "line one\n.hidden".into();
        let data = sink.compose(&alert);
        assert!(data.contains("Subject: [Security] Finding in 'monitor_passwd' on host 'web01'\r\n"));
        assert!(data.contains("\r\n..hidden\r\n"));
        assert!(data.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn multiline_replies_are_consumed() {
        let mut reader = Cursor::new(b"250-first\r\n250-second\r\n250 done\r\n".to_vec());
        expect_reply(&mut reader, &[250]).unwrap();
        let mut reader = Cursor::new(b"550 no such user\r\n".to_vec());
        assert!(expect_reply(&mut reader, &[250]).is_err());
    }

    #[test]
    fn mail_dialogue_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut received = Vec::new();
            writer.write_all(b"220 test ESMTP\r\n").unwrap();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                received.push(line.clone());
                if in_data {
                    if line == ".\r\n" {
                        in_data = false;
                        writer.write_all(b"250 queued\r\n").unwrap();
                    }
                    continue;
                }
                let reply: &[u8] = if line.starts_with("DATA") {
                    in_data = true;
                    b"354 go ahead\r\n"
                } else if line.starts_with("QUIT") {
                    writer.write_all(b"221 bye\r\n").unwrap();
                    break;
                } else {
                    b"250 ok\r\n"
                };
                writer.write_all(reply).unwrap();
            }
            received
        });

        let sink = MailSink::new(addr.to_string(), "guard@web01", "ops@example.org").with_retry(
            Retry {
                attempts: 1,
                delay: Duration::ZERO,
            },
        );
        sink.deliver(&finding()).unwrap();

        let received = server.join().unwrap();
        assert!(received.iter().any(|l| l == "MAIL FROM:<guard@web01>\r\n"));
        assert!(received.iter().any(|l| l == "RCPT TO:<ops@example.org>\r\n"));
        assert!(received.iter().any(|l| l.contains("User 'mallory' was added.")));
    }

    #[test]
    fn router_skips_failing_channel() {
        struct Broken;
        impl AlertSink for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn deliver(&self, _alert: &Alert) -> anyhow::Result<()> {
                bail!("down")
            }
        }

        let recorder = RecordingSink::default();
        let router = AlertRouter::with_sinks(
            "web01",
            vec![Box::new(Broken), Box::new(recorder.clone())],
        );
        assert_eq!(router.finding("monitor_hosts_file", "changed"), 1);
        assert_eq!(recorder.count(AlertKind::Finding), 1);
        assert_eq!(recorder.alerts()[0].host, "web01");
    }

    #[test]
    fn test_alert_reaches_every_channel() {
        let first = RecordingSink::default();
        let second = RecordingSink::default();
        let router = AlertRouter::with_sinks(
            "web01",
            vec![Box::new(first.clone()), Box::new(second.clone())],
        );
        assert_eq!(router.test_alert(), 2);
        for sink in [first, second] {
            let alerts = sink.alerts();
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].script, TEST_ALERT);
            assert_eq!(alerts[0].message, "Alert test on host 'web01'.");
        }
    }

    #[test]
    fn hostname_is_never_empty() {
        assert!(!hostname().is_empty());
    }
}
