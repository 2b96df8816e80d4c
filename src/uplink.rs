//! Pushing readings to a ThingSpeak-style channel through an ESP8266 AT modem.

use core::fmt::Write as _;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, ReadReady, Write};
use heapless::String;

use crate::temperature::Temperature;

/// ThingSpeak's API endpoint.
pub const THINGSPEAK_HOST: &str = "184.106.153.149";

const COMMAND_GAP_MS: u32 = 1000;
const RESET_GAP_MS: u32 = 5000;
/// Bytes of modem chatter we are willing to read while waiting for a verdict.
const REPLY_LIMIT: usize = 256;
/// Cap on stale output discarded before a new command.
const DRAIN_LIMIT: usize = 4 * REPLY_LIMIT;
/// Longest line that can still be a verdict.
const VERDICT_LINE_CAP: usize = 8;

type CommandBuf = String<96>;
type RequestBuf = String<160>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplinkConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
    pub api_key: &'a str,
    pub host: &'a str,
    pub port: u16,
    /// Multiplexed connection id (`AT+CIPMUX=1` mode).
    pub link_id: u8,
}

impl<'a> UplinkConfig<'a> {
    pub const fn new(ssid: &'a str, password: &'a str, api_key: &'a str) -> Self {
        Self {
            ssid,
            password,
            api_key,
            host: THINGSPEAK_HOST,
            port: 80,
            link_id: 4,
        }
    }
}

/// Values sent in one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UplinkReading {
    pub bpm: u32,
    pub temperature: Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadError<E> {
    /// Serial transport error
    Io(E),
    /// The modem answered with an error.
    Rejected,
    /// Too much output without an `OK` or an error.
    NoReply,
    /// The transport closed while waiting for a reply.
    UnexpectedEof,
    /// A command or request did not fit its buffer.
    Overflow,
}

impl<E> From<E> for UploadError<E> {
    fn from(error: E) -> Self {
        UploadError::Io(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Ok,
    Error,
}

/// Splits modem output into lines and reports a line that is exactly `OK`
/// or `ERROR`, ignoring case.
///
/// Status lines such as `SEND OK` or `ALREADY CONNECTED` are not verdicts.
struct ReplyMatcher {
    line: heapless::Vec<u8, VERDICT_LINE_CAP>,
    too_long: bool,
}

impl ReplyMatcher {
    fn new() -> Self {
        Self {
            line: heapless::Vec::new(),
            too_long: false,
        }
    }

    fn feed(&mut self, byte: u8) -> Option<Verdict> {
        match byte {
            b'\r' => None,
            b'\n' => {
                let verdict = match (self.too_long, self.line.as_slice()) {
                    (false, b"OK") => Some(Verdict::Ok),
                    (false, b"ERROR") => Some(Verdict::Error),
                    _ => None,
                };
                self.line.clear();
                self.too_long = false;
                verdict
            }
            _ => {
                if self.line.push(byte.to_ascii_uppercase()).is_err() {
                    self.too_long = true;
                }
                None
            }
        }
    }
}

pub struct Esp8266<'a, IO, D> {
    io: IO,
    delay: D,
    config: UplinkConfig<'a>,
}

impl<'a, IO, D> Esp8266<'a, IO, D>
where
    IO: Read + ReadReady + Write,
    D: DelayNs,
{
    pub fn new(io: IO, delay: D, config: UplinkConfig<'a>) -> Self {
        Self { io, delay, config }
    }

    pub fn release(self) -> (IO, D) {
        (self.io, self.delay)
    }

    /// Resets the modem and joins the configured network.
    ///
    /// The modem's answers are not checked here. A failed join shows up as
    /// rejected pushes later.
    pub async fn initialize(&mut self) -> Result<(), UploadError<IO::Error>> {
        let mut join = CommandBuf::new();
        write!(join, "AT+CWJAP=\"{}\",\"{}\"", self.config.ssid, self.config.password)
            .map_err(|_| UploadError::Overflow)?;

        let steps: [(&str, u32); 7] = [
            ("AT", COMMAND_GAP_MS),
            ("AT+GMR", COMMAND_GAP_MS),
            ("AT+CWMODE=3", COMMAND_GAP_MS),
            ("AT+RST", RESET_GAP_MS),
            ("AT+CIPMUX=1", COMMAND_GAP_MS),
            (join.as_str(), COMMAND_GAP_MS),
            ("AT+CIFSR", COMMAND_GAP_MS),
        ];
        for (cmd, gap_ms) in steps {
            self.command(cmd).await?;
            self.delay.delay_ms(gap_ms).await;
        }

        info!("uplink: joined {}", self.config.ssid);
        Ok(())
    }

    /// Opens a TCP link and sends one update request.
    pub async fn push(&mut self, reading: &UplinkReading) -> Result<(), UploadError<IO::Error>> {
        let cfg = self.config;

        let mut start = CommandBuf::new();
        write!(start, "AT+CIPSTART={},\"TCP\",\"{}\",{}", cfg.link_id, cfg.host, cfg.port)
            .map_err(|_| UploadError::Overflow)?;
        // Replies to the join sequence and `SEND OK` from the last push are
        // still queued; none of them answer this command.
        self.drain().await?;
        self.command(start.as_str()).await?;
        self.await_reply().await?;

        let mut request = RequestBuf::new();
        write!(
            request,
            "GET /update?api_key={}&field1={}&field2={}\r\n\r\n",
            cfg.api_key, reading.temperature, reading.bpm
        )
        .map_err(|_| UploadError::Overflow)?;

        let mut send = CommandBuf::new();
        write!(send, "AT+CIPSEND={},{}", cfg.link_id, request.len())
            .map_err(|_| UploadError::Overflow)?;
        self.command(send.as_str()).await?;

        // Give the modem time to raise its '>' prompt.
        self.delay.delay_ms(COMMAND_GAP_MS).await;
        self.io.write_all(request.as_bytes()).await?;
        self.io.flush().await?;

        debug!("uplink: sent {} byte request", request.len());
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<(), UploadError<IO::Error>> {
        self.io.write_all(cmd.as_bytes()).await?;
        self.io.write_all(b"\r\n").await?;
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), UploadError<IO::Error>> {
        let mut scratch = [0u8; 32];
        let mut dropped = 0;
        while dropped < DRAIN_LIMIT && self.io.read_ready()? {
            let n = self.io.read(&mut scratch).await?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!("uplink: dropped {} stale bytes", dropped);
        }
        Ok(())
    }

    async fn await_reply(&mut self) -> Result<(), UploadError<IO::Error>> {
        let mut matcher = ReplyMatcher::new();
        let mut byte = [0u8; 1];
        for _ in 0..REPLY_LIMIT {
            if self.io.read(&mut byte).await? == 0 {
                return Err(UploadError::UnexpectedEof);
            }
            match matcher.feed(byte[0]) {
                Some(Verdict::Ok) => return Ok(()),
                Some(Verdict::Error) => {
                    warn!("uplink: modem rejected connection");
                    return Err(UploadError::Rejected);
                }
                None => {}
            }
        }
        Err(UploadError::NoReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embedded_io_async::ErrorType;

    /// Scripted modem. `stale` is queued before anything is sent; `reply`
    /// only arrives once a command has been written.
    struct Modem {
        stale: &'static [u8],
        reply: &'static [u8],
        pos: usize,
        sent: Vec<u8>,
    }

    impl Modem {
        fn replying(reply: &'static [u8]) -> Self {
            Self::with_backlog(b"", reply)
        }

        fn with_backlog(stale: &'static [u8], reply: &'static [u8]) -> Self {
            Self { stale, reply, pos: 0, sent: Vec::new() }
        }

        fn queued(&self) -> &'static [u8] {
            if self.pos < self.stale.len() {
                &self.stale[self.pos..]
            } else if self.sent.is_empty() {
                b""
            } else {
                &self.reply[self.pos - self.stale.len()..]
            }
        }

        fn sent(&self) -> &str {
            core::str::from_utf8(&self.sent).unwrap()
        }
    }

    impl ErrorType for Modem {
        type Error = Infallible;
    }

    impl Read for Modem {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let queued = self.queued();
            let n = buf.len().min(queued.len());
            buf[..n].copy_from_slice(&queued[..n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ReadReady for Modem {
        fn read_ready(&mut self) -> Result<bool, Infallible> {
            Ok(!self.queued().is_empty())
        }
    }

    impl Write for Modem {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[derive(Default)]
    struct Clock {
        elapsed_ns: u64,
    }

    impl DelayNs for Clock {
        async fn delay_ns(&mut self, ns: u32) {
            self.elapsed_ns += u64::from(ns);
        }
    }

    const CONFIG: UplinkConfig<'static> = UplinkConfig::new("ward-7", "hunter2", "KEY123");

    fn reading() -> UplinkReading {
        UplinkReading { bpm: 72, temperature: Temperature::from_deci_celsius(370) }
    }

    #[test]
    fn initialize_sends_the_join_sequence() {
        let mut esp = Esp8266::new(Modem::replying(b""), Clock::default(), CONFIG);
        block_on(esp.initialize()).unwrap();
        let (modem, clock) = esp.release();

        assert_eq!(
            modem.sent(),
            "AT\r\nAT+GMR\r\nAT+CWMODE=3\r\nAT+RST\r\nAT+CIPMUX=1\r\n\
             AT+CWJAP=\"ward-7\",\"hunter2\"\r\nAT+CIFSR\r\n"
        );
        assert_eq!(clock.elapsed_ns, 11_000 * 1_000_000);
    }

    #[test]
    fn push_opens_a_link_and_sends_the_update() {
        let modem = Modem::replying(b"AT+CIPSTART=4,\"TCP\",\"184.106.153.149\",80\r\n4,CONNECT\r\n\r\nOK\r\n");
        let mut esp = Esp8266::new(modem, Clock::default(), CONFIG);
        block_on(esp.push(&reading())).unwrap();
        let (modem, clock) = esp.release();

        let request = "GET /update?api_key=KEY123&field1=98.6&field2=72\r\n\r\n";
        let expected = format!(
            "AT+CIPSTART=4,\"TCP\",\"184.106.153.149\",80\r\nAT+CIPSEND=4,{}\r\n{}",
            request.len(),
            request
        );
        assert_eq!(modem.sent(), expected);
        assert_eq!(clock.elapsed_ns, 1_000 * 1_000_000);
    }

    #[test]
    fn error_reply_aborts_before_sending() {
        for reply in [&b"ERROR\r\n"[..], &b"ALREADY CONNECTED\r\n\r\nError\r\n"[..]] {
            let mut esp = Esp8266::new(Modem::replying(reply), Clock::default(), CONFIG);
            assert_eq!(block_on(esp.push(&reading())), Err(UploadError::Rejected));
            let (modem, _) = esp.release();
            assert!(!modem.sent().contains("CIPSEND"));
        }
    }

    #[test]
    fn status_lines_are_not_verdicts() {
        let modem = Modem::replying(b"SEND OK\r\nERROR\r\n");
        let mut esp = Esp8266::new(modem, Clock::default(), CONFIG);
        assert_eq!(block_on(esp.push(&reading())), Err(UploadError::Rejected));
        let (modem, _) = esp.release();
        assert!(!modem.sent().contains("CIPSEND"));
    }

    #[test]
    fn leftover_ok_from_earlier_commands_is_discarded() {
        let backlog: &'static [u8] = b"AT+CIFSR\r\n+CIFSR:STAIP,\"10.0.0.7\"\r\n\r\nOK\r\n\r\nSEND OK\r\n";
        let modem = Modem::with_backlog(backlog, b"4,CLOSED\r\n\r\nERROR\r\n");
        let mut esp = Esp8266::new(modem, Clock::default(), CONFIG);
        assert_eq!(block_on(esp.push(&reading())), Err(UploadError::Rejected));
        let (modem, _) = esp.release();
        assert!(modem.sent().starts_with("AT+CIPSTART="));
        assert!(!modem.sent().contains("CIPSEND"));
    }

    #[test]
    fn silent_or_chatty_modem_fails_cleanly() {
        let mut esp = Esp8266::new(Modem::replying(b"busy p...\r\n"), Clock::default(), CONFIG);
        assert_eq!(block_on(esp.push(&reading())), Err(UploadError::UnexpectedEof));

        let chatter: &'static [u8] = &[b'.'; 300];
        let mut esp = Esp8266::new(Modem::replying(chatter), Clock::default(), CONFIG);
        assert_eq!(block_on(esp.push(&reading())), Err(UploadError::NoReply));
    }

    #[test]
    fn oversized_request_is_an_overflow() {
        let key: &'static str = "K".repeat(200).leak();
        let config = UplinkConfig::new("ward-7", "hunter2", key);
        let modem = Modem::replying(b"OK\r\n");
        let mut esp = Esp8266::new(modem, Clock::default(), config);
        assert_eq!(block_on(esp.push(&reading())), Err(UploadError::Overflow));
    }
}
