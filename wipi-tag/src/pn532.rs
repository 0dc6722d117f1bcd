//! NXP PN532 reader over a serial port (HSU / UART)
//!
//! Host frames: `00 00 FF LEN LCS D4 <cmd> <params..> DCS 00`. The PN532
//! acknowledges every command with `00 00 FF 00 FF 00` and then answers with
//! a frame whose TFI is `D5` and whose command code is `cmd + 1`.
//!
//! Tags are driven as NFC Forum Type 2 tags (NTAG21x / Ultralight): the NDEF
//! message is stored as a TLV from page 4, one 4 byte page per WRITE.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::*;
use wipi_proto::type2::{self, TlvError};

use crate::{HardwareError, Result, TagChannel, TagId};

pub const PREAMBLE: [u8; 3] = [0x00, 0x00, 0xFF];
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
pub const TFI_HOST: u8 = 0xD4;
pub const TFI_PN532: u8 = 0xD5;

// PN532 commands
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x02;
pub const CMD_SAM_CONFIGURATION: u8 = 0x14;
pub const CMD_RF_CONFIGURATION: u8 = 0x32;
pub const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
pub const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
pub const CMD_IN_RELEASE: u8 = 0x52;

// Type 2 tag commands, sent through InDataExchange
pub const TAG_READ: u8 = 0x30;
pub const TAG_WRITE: u8 = 0xA2;

/// ISO/IEC 14443 Type A at 106 kbps
const BRTY_106K_TYPE_A: u8 = 0x00;

/// RFConfiguration item: MxRtyATR, MxRtyPSL, MxRtyPassiveActivation
const RF_ITEM_MAX_RETRIES: u8 = 0x05;

/// Passive activation retries per InListPassiveTarget, keeps one poll short
const PASSIVE_ACTIVATION_RETRIES: u8 = 0x10;

/// Last user page of the largest supported tag (NTAG216)
const LAST_USER_PAGE: u8 = 225;

/// Bytes skipped while looking for a frame start before giving up
const MAX_SYNC_BYTES: usize = 64;

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Frame received from the PN532
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    /// TFI and payload, checksums already verified
    Data(Vec<u8>),
}

/// Build a normal information frame for `command`
pub fn build_frame(command: u8, params: &[u8]) -> Result<Vec<u8>> {
    let len = params.len() + 2;
    if len > 0xFE {
        return Err(HardwareError::Protocol(format!(
            "command 0x{command:02x} too long: {len} bytes"
        )));
    }
    let len = len as u8;

    let mut frame = Vec::with_capacity(len as usize + 7);
    frame.extend_from_slice(&PREAMBLE);
    frame.push(len);
    frame.push(checksum(&[len]));
    frame.push(TFI_HOST);
    frame.push(command);
    frame.extend_from_slice(params);

    let mut body = Vec::with_capacity(len as usize);
    body.push(TFI_HOST);
    body.push(command);
    body.extend_from_slice(params);
    frame.push(checksum(&body));
    frame.push(0x00);
    Ok(frame)
}

/// Two's complement checksum: `sum(data) + checksum == 0 (mod 256)`
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// Read one frame, skipping noise before the start code
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame> {
    let mut byte = [0u8; 1];
    let mut previous = None;
    let mut skipped = 0;
    loop {
        read_exact(reader, &mut byte)?;
        if previous == Some(0x00) && byte[0] == 0xFF {
            break;
        }
        previous = Some(byte[0]);
        skipped += 1;
        if skipped > MAX_SYNC_BYTES {
            return Err(HardwareError::Protocol("no frame start code".to_string()));
        }
    }

    let mut header = [0u8; 2];
    read_exact(reader, &mut header)?;
    let [len, lcs] = header;

    match (len, lcs) {
        (0x00, 0xFF) => {
            read_exact(reader, &mut byte)?;
            return Ok(Frame::Ack);
        }
        (0xFF, 0x00) => {
            read_exact(reader, &mut byte)?;
            return Ok(Frame::Nack);
        }
        (0xFF, 0xFF) => {
            return Err(HardwareError::Protocol("extended frames are not supported".to_string()));
        }
        _ => {}
    }
    if len.wrapping_add(lcs) != 0 {
        return Err(HardwareError::Protocol("length checksum mismatch".to_string()));
    }

    // data, DCS, postamble
    let mut data = vec![0u8; len as usize + 2];
    read_exact(reader, &mut data)?;
    let dcs = data[len as usize];
    data.truncate(len as usize);
    if checksum(&data) != dcs {
        return Err(HardwareError::Protocol("data checksum mismatch".to_string()));
    }

    Ok(Frame::Data(data))
}

fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => HardwareError::Timeout,
        _ => HardwareError::Io(e),
    })
}

/// Strip TFI and response code from the answer to `command`
pub fn parse_response(command: u8, data: &[u8]) -> Result<Vec<u8>> {
    if data == [0x7F] {
        return Err(HardwareError::Protocol(format!(
            "reader rejected command 0x{command:02x}"
        )));
    }
    match data {
        [TFI_PN532, code, rest @ ..] if *code == command.wrapping_add(1) => Ok(rest.to_vec()),
        _ => Err(HardwareError::Protocol(format!(
            "unexpected answer to command 0x{command:02x}: {}",
            data_encoding::HEXLOWER.encode(data)
        ))),
    }
}

/// Target number and NFCID1 from an InListPassiveTarget answer
pub fn parse_target(response: &[u8]) -> Result<Option<(u8, TagId)>> {
    let Some(&count) = response.first() else {
        return Err(HardwareError::Protocol("empty InListPassiveTarget answer".to_string()));
    };
    if count == 0 {
        return Ok(None);
    }

    // Tg, SENS_RES (2), SEL_RES, NFCIDLength, NFCID1
    let truncated = || HardwareError::Protocol("target data truncated".to_string());
    let target = *response.get(1).ok_or_else(truncated)?;
    let id_len = *response.get(5).ok_or_else(truncated)? as usize;
    let id = response.get(6..6 + id_len).ok_or_else(truncated)?;

    Ok(Some((target, TagId::new(id))))
}

/// Status byte of an InDataExchange answer, followed by the tag's data
pub fn parse_exchange(tag_command: u8, response: &[u8]) -> Result<Vec<u8>> {
    match response {
        [status, rest @ ..] if status & 0x3F == 0 => Ok(rest.to_vec()),
        [status, ..] => Err(HardwareError::TagStatus { command: tag_command, status: *status }),
        [] => Err(HardwareError::Protocol("empty InDataExchange answer".to_string())),
    }
}

/// Largest record area the reader addresses, pages 4 to 225
pub const MAX_USER_BYTES: usize =
    (LAST_USER_PAGE as usize - type2::FIRST_USER_PAGE as usize + 1) * type2::PAGE_SIZE;

/// Writable bytes for a tag, as claimed by its CC page and capped to the user area
pub fn usable_capacity(cc: &[u8; type2::PAGE_SIZE]) -> Option<usize> {
    type2::data_area_size(cc).map(|size| size.min(MAX_USER_BYTES))
}

/// Page number of the `index`th page of the record area
pub fn user_page(index: usize) -> Result<u8> {
    u8::try_from(type2::FIRST_USER_PAGE as usize + index)
        .ok()
        .filter(|page| *page <= LAST_USER_PAGE)
        .ok_or_else(|| HardwareError::Protocol(format!("page index {index} is past the user area")))
}

/// PN532 session over any byte stream
pub struct Pn532<P> {
    port: P,
    target: Option<u8>,
}

impl<P: Read + Write> Pn532<P> {
    pub fn new(port: P) -> Self {
        Self { port, target: None }
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Firmware check, SAM in normal mode, bounded passive activation retries
    pub fn configure(&mut self) -> Result<()> {
        let firmware = self.command(CMD_GET_FIRMWARE_VERSION, &[])?;
        if let [ic, version, revision, ..] = firmware[..] {
            info!("PN5{ic:02x} firmware {version}.{revision}");
        }

        // normal mode, virtual card timeout 1s, use IRQ
        self.command(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01])?;
        self.command(
            CMD_RF_CONFIGURATION,
            &[RF_ITEM_MAX_RETRIES, 0xFF, 0x01, PASSIVE_ACTIVATION_RETRIES],
        )?;
        Ok(())
    }

    pub fn command(&mut self, command: u8, params: &[u8]) -> Result<Vec<u8>> {
        let frame = build_frame(command, params)?;
        self.port.write_all(&frame)?;
        self.port.flush()?;

        match read_frame(&mut self.port)? {
            Frame::Ack => {}
            Frame::Nack => return Err(HardwareError::Protocol("reader sent NACK".to_string())),
            Frame::Data(_) => return Err(HardwareError::Protocol("expected ACK".to_string())),
        }
        match read_frame(&mut self.port)? {
            Frame::Data(data) => parse_response(command, &data),
            other => Err(HardwareError::Protocol(format!("expected answer, got {other:?}"))),
        }
    }

    /// One InListPassiveTarget round; remembers the target for later exchanges
    pub fn select_target(&mut self) -> Result<Option<TagId>> {
        self.target = None;
        let response = self.command(CMD_IN_LIST_PASSIVE_TARGET, &[0x01, BRTY_106K_TYPE_A])?;
        Ok(parse_target(&response)?.map(|(target, id)| {
            self.target = Some(target);
            id
        }))
    }

    pub fn release(&mut self) {
        if let Some(target) = self.target.take() {
            if let Err(e) = self.command(CMD_IN_RELEASE, &[target]) {
                debug!("release of target {target} failed: {e}");
            }
        }
    }

    fn exchange(&mut self, tag_data: &[u8]) -> Result<Vec<u8>> {
        let target = self.target.ok_or(HardwareError::TagLost)?;
        let mut params = Vec::with_capacity(tag_data.len() + 1);
        params.push(target);
        params.extend_from_slice(tag_data);

        let response = self.command(CMD_IN_DATA_EXCHANGE, &params)?;
        parse_exchange(tag_data.first().copied().unwrap_or_default(), &response)
    }

    fn read_pages(&mut self, page: u8) -> Result<Vec<u8>> {
        let data = self.exchange(&[TAG_READ, page])?;
        if data.len() != 16 {
            return Err(HardwareError::Protocol(format!(
                "READ of page {page} returned {} bytes",
                data.len()
            )));
        }
        Ok(data)
    }

    fn capacity(&mut self) -> Result<usize> {
        let data = self.read_pages(type2::CC_PAGE)?;
        let cc = [data[0], data[1], data[2], data[3]];
        usable_capacity(&cc).ok_or(HardwareError::NotFormatted)
    }

    /// Store `record` as an NDEF TLV from page 4 of the selected tag
    pub fn write_ndef(&mut self, record: &[u8]) -> Result<()> {
        let tlv = type2::ndef_tlv(record)?;
        let capacity = self.capacity()?;
        if tlv.len() > capacity {
            return Err(HardwareError::TagTooSmall { needed: tlv.len(), capacity });
        }

        for (index, page) in type2::pages(&tlv).enumerate() {
            let mut data = Vec::with_capacity(2 + type2::PAGE_SIZE);
            data.push(TAG_WRITE);
            data.push(user_page(index)?);
            data.extend_from_slice(&page);
            self.exchange(&data)?;
        }
        debug!("wrote {} bytes ({} pages)", tlv.len(), tlv.len() / type2::PAGE_SIZE);
        Ok(())
    }

    /// Read the NDEF message of the selected tag, four pages at a time
    pub fn read_ndef(&mut self) -> Result<Vec<u8>> {
        let mut memory = Vec::new();
        let mut page = type2::FIRST_USER_PAGE;
        loop {
            memory.extend_from_slice(&self.read_pages(page)?);
            match type2::extract_ndef(&memory) {
                Ok(message) => return Ok(message),
                Err(TlvError::Truncated) if page + 4 <= LAST_USER_PAGE => page += 4,
                Err(TlvError::Truncated) => return Err(TlvError::NoNdefMessage.into()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// PN532 attached to a serial port
#[cfg(feature = "serial")]
pub struct Pn532Uart {
    device: String,
    baud_rate: u32,
    reader: Option<Pn532<Box<dyn serialport::SerialPort>>>,
}

#[cfg(feature = "serial")]
impl Pn532Uart {
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            reader: None,
        }
    }

    fn reader(&mut self) -> Result<&mut Pn532<Box<dyn serialport::SerialPort>>> {
        self.reader.as_mut().ok_or(HardwareError::NotOpen)
    }
}

#[cfg(feature = "serial")]
fn wake(reader: &mut Pn532<Box<dyn serialport::SerialPort>>) -> Result<()> {
    let port = reader.port_mut();
    // HSU wake-up: a long preamble pulls the chip out of power down
    port.write_all(&[0x55, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])?;
    port.flush()?;
    std::thread::sleep(Duration::from_millis(10));
    port.clear(serialport::ClearBuffer::Input)?;
    reader.configure()
}

#[cfg(feature = "serial")]
impl TagChannel for Pn532Uart {
    fn describe(&self) -> String {
        format!("pn532 on {} @ {} baud", self.device, self.baud_rate)
    }

    fn open(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.device, self.baud_rate)
            .timeout(RESPONSE_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|e| HardwareError::Open {
                device: self.device.clone(),
                reason: e.to_string(),
            })?;

        let mut reader = Pn532::new(port);
        wake(&mut reader)?;
        self.reader = Some(reader);
        debug!("{} ready", self.describe());
        Ok(())
    }

    fn poll_for_tag(&mut self, timeout: Duration) -> Result<Option<TagId>> {
        let reader = self.reader()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = reader.select_target()? {
                return Ok(Some(id));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        self.reader()?.write_ndef(record)
    }

    fn read_record(&mut self) -> Result<Vec<u8>> {
        self.reader()?.read_ndef()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut reader) = self.reader.take() {
            reader.release();
            debug!("closed {}", self.describe());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn answer(command: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![TFI_PN532, command + 1];
        body.extend_from_slice(payload);
        let mut frame = PREAMBLE.to_vec();
        frame.push(body.len() as u8);
        frame.push(checksum(&[body.len() as u8]));
        frame.extend_from_slice(&body);
        frame.push(checksum(&body));
        frame.push(0x00);
        frame
    }

    #[test]
    fn firmware_version_frame() {
        // well known GetFirmwareVersion request
        assert_eq!(
            build_frame(CMD_GET_FIRMWARE_VERSION, &[]).unwrap(),
            vec![0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn sam_configuration_frame() {
        assert_eq!(
            build_frame(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01]).unwrap(),
            vec![0x00, 0x00, 0xFF, 0x05, 0xFB, 0xD4, 0x14, 0x01, 0x14, 0x01, 0x02, 0x00]
        );
    }

    #[test]
    fn oversized_command_is_rejected() {
        assert!(matches!(
            build_frame(CMD_IN_DATA_EXCHANGE, &[0u8; 254]),
            Err(HardwareError::Protocol(_))
        ));
    }

    #[test]
    fn reads_ack_then_answer() {
        let mut bytes = ACK_FRAME.to_vec();
        bytes.extend_from_slice(&answer(CMD_GET_FIRMWARE_VERSION, &[0x32, 0x01, 0x06, 0x07]));
        let mut cursor = Cursor::new(bytes);

        assert_eq!(read_frame(&mut cursor).unwrap(), Frame::Ack);
        let Frame::Data(data) = read_frame(&mut cursor).unwrap() else {
            panic!("expected data frame");
        };
        assert_eq!(
            parse_response(CMD_GET_FIRMWARE_VERSION, &data).unwrap(),
            vec![0x32, 0x01, 0x06, 0x07]
        );
    }

    #[test]
    fn skips_leading_noise() {
        let mut bytes = vec![0x55, 0x13, 0x37];
        bytes.extend_from_slice(&ACK_FRAME);
        assert_eq!(read_frame(&mut Cursor::new(bytes)).unwrap(), Frame::Ack);
    }

    #[test]
    fn rejects_bad_checksums() {
        let mut frame = answer(CMD_GET_FIRMWARE_VERSION, &[0x32]);
        let dcs = frame.len() - 2;
        frame[dcs] ^= 0x01;
        assert!(matches!(
            read_frame(&mut Cursor::new(frame)),
            Err(HardwareError::Protocol(_))
        ));

        let lcs_broken = vec![0x00, 0x00, 0xFF, 0x03, 0x00, 0xD5, 0x03, 0x00, 0x00, 0x00];
        assert!(matches!(
            read_frame(&mut Cursor::new(lcs_broken)),
            Err(HardwareError::Protocol(_))
        ));
    }

    #[test]
    fn nack_and_short_input() {
        let nack = vec![0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];
        assert_eq!(read_frame(&mut Cursor::new(nack)).unwrap(), Frame::Nack);
        assert!(matches!(
            read_frame(&mut Cursor::new(vec![0x00, 0x00, 0xFF, 0x02])),
            Err(HardwareError::Io(_))
        ));
    }

    #[test]
    fn error_frame_and_wrong_code() {
        assert!(matches!(
            parse_response(CMD_IN_LIST_PASSIVE_TARGET, &[0x7F]),
            Err(HardwareError::Protocol(_))
        ));
        assert!(matches!(
            parse_response(CMD_IN_LIST_PASSIVE_TARGET, &[TFI_PN532, 0x41, 0x00]),
            Err(HardwareError::Protocol(_))
        ));
    }

    #[test]
    fn passive_target_parsing() {
        assert_eq!(parse_target(&[0x00]).unwrap(), None);

        // NTAG215: SENS_RES 0044, SEL_RES 00, 7 byte UID
        let response = [0x01, 0x01, 0x00, 0x44, 0x00, 0x07, 0x04, 0x5A, 0x1E, 0x22, 0x8C, 0x64, 0x80];
        let (target, id) = parse_target(&response).unwrap().unwrap();
        assert_eq!(target, 1);
        assert_eq!(id.to_string(), "045A1E228C6480");

        assert!(parse_target(&[0x01, 0x01, 0x00, 0x44, 0x00, 0x07, 0x04]).is_err());
        assert!(parse_target(&[]).is_err());
    }

    #[test]
    fn exchange_status() {
        assert_eq!(parse_exchange(TAG_WRITE, &[0x00]).unwrap(), Vec::<u8>::new());
        assert_eq!(parse_exchange(TAG_READ, &[0x00, 1, 2]).unwrap(), vec![1, 2]);
        assert!(matches!(
            parse_exchange(TAG_WRITE, &[0x01]),
            Err(HardwareError::TagStatus { command: TAG_WRITE, status: 0x01 })
        ));
    }

    /// Port that replays canned reader output and records what the host sent
    struct ScriptedPort {
        input: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl ScriptedPort {
        fn new() -> Self {
            Self { input: Cursor::new(Vec::new()), sent: Vec::new() }
        }

        fn reply(&mut self, command: u8, payload: &[u8]) {
            let script = self.input.get_mut();
            script.extend_from_slice(&ACK_FRAME);
            script.extend_from_slice(&answer(command, payload));
        }

        /// Tag answer to an InDataExchange, status byte first
        fn tag_reply(&mut self, data: &[u8]) {
            let mut payload = vec![0x00];
            payload.extend_from_slice(data);
            self.reply(CMD_IN_DATA_EXCHANGE, &payload);
        }

        /// Host frames written so far, as `[TFI, command, params..]`
        fn sent_frames(&self) -> Vec<Vec<u8>> {
            let mut cursor = Cursor::new(self.sent.clone());
            let mut frames = Vec::new();
            while let Ok(Frame::Data(data)) = read_frame(&mut cursor) {
                frames.push(data);
            }
            frames
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cc_page(size_byte: u8) -> Vec<u8> {
        let mut pages = vec![0xE1, 0x10, size_byte, 0x00];
        pages.resize(16, 0x00);
        pages
    }

    fn selected(port: ScriptedPort) -> Pn532<ScriptedPort> {
        let mut reader = Pn532::new(port);
        reader.target = Some(1);
        reader
    }

    fn record_for(secret_len: usize) -> Vec<u8> {
        let credentials = wipi_proto::Credentials::secured("Lab", &"s".repeat(secret_len));
        wipi_proto::to_tag_record(&wipi_proto::encode(&credentials).unwrap())
    }

    #[test]
    fn user_area_bounds() {
        assert_eq!(user_page(0).unwrap(), 4);
        assert_eq!(user_page(221).unwrap(), LAST_USER_PAGE);
        assert!(user_page(222).is_err());
        assert!(user_page(252).is_err());
        assert!(user_page(300).is_err());

        assert_eq!(MAX_USER_BYTES, 888);
        // NTAG213
        assert_eq!(usable_capacity(&[0xE1, 0x10, 0x12, 0x00]), Some(144));
        // NTAG I2C plus 2k claims more than pages 4..=225 hold
        assert_eq!(usable_capacity(&[0xE1, 0x10, 0xEA, 0x00]), Some(MAX_USER_BYTES));
        assert_eq!(usable_capacity(&[0x00, 0x10, 0x12, 0x00]), None);
    }

    #[test]
    fn writes_pages_from_four() {
        let record = record_for(12);
        let tlv = type2::ndef_tlv(&record).unwrap();
        let page_count = tlv.len() / type2::PAGE_SIZE;

        let mut port = ScriptedPort::new();
        port.tag_reply(&cc_page(0x12));
        for _ in 0..page_count {
            port.tag_reply(&[]);
        }
        let mut reader = selected(port);
        reader.write_ndef(&record).unwrap();

        let frames = reader.port_mut().sent_frames();
        assert_eq!(frames[0], vec![TFI_HOST, CMD_IN_DATA_EXCHANGE, 1, TAG_READ, type2::CC_PAGE]);
        let writes = &frames[1..];
        assert_eq!(writes.len(), page_count);

        let mut stored = Vec::new();
        for (index, frame) in writes.iter().enumerate() {
            assert_eq!(&frame[..4], &[TFI_HOST, CMD_IN_DATA_EXCHANGE, 1, TAG_WRITE]);
            assert_eq!(frame[4] as usize, 4 + index);
            stored.extend_from_slice(&frame[5..]);
        }
        assert_eq!(stored, tlv);
    }

    #[test]
    fn record_past_user_area_is_refused_before_writing() {
        let record = record_for(1500);
        let tlv_len = type2::ndef_tlv(&record).unwrap().len();
        // fits what the CC claims, not what pages 4..=225 hold
        assert!(tlv_len <= 0xEA * 8);

        let mut port = ScriptedPort::new();
        port.tag_reply(&cc_page(0xEA));
        let mut reader = selected(port);

        assert!(matches!(
            reader.write_ndef(&record),
            Err(HardwareError::TagTooSmall { capacity: MAX_USER_BYTES, .. })
        ));
        // only the CC read went out
        assert_eq!(reader.port_mut().sent_frames().len(), 1);
    }

    #[test]
    fn largest_record_ends_on_last_user_page() {
        // TLV header 4 bytes, record padded to fill pages 4..=225 exactly
        let mut port = ScriptedPort::new();
        port.tag_reply(&cc_page(0xEA));
        let record = vec![0xD1; MAX_USER_BYTES - 5];
        let page_count = type2::ndef_tlv(&record).unwrap().len() / type2::PAGE_SIZE;
        assert_eq!(page_count, 222);
        for _ in 0..page_count {
            port.tag_reply(&[]);
        }
        let mut reader = selected(port);
        reader.write_ndef(&record).unwrap();

        let frames = reader.port_mut().sent_frames();
        assert_eq!(frames.last().unwrap()[4], LAST_USER_PAGE);
    }

    #[test]
    fn reads_record_back_four_pages_at_a_time() {
        let record = record_for(40);
        let mut memory = type2::ndef_tlv(&record).unwrap();
        memory.resize(memory.len().div_ceil(16) * 16, 0x00);

        let mut port = ScriptedPort::new();
        for chunk in memory.chunks(16) {
            port.tag_reply(chunk);
        }
        let mut reader = selected(port);
        assert_eq!(reader.read_ndef().unwrap(), record);

        let pages: Vec<u8> = reader.port_mut().sent_frames().iter().map(|frame| frame[4]).collect();
        let expected: Vec<u8> = (0..memory.len() / 16).map(|i| 4 + 4 * i as u8).collect();
        assert_eq!(pages, expected);
    }

    #[test]
    fn exchange_needs_selected_tag() {
        let mut reader = Pn532::new(ScriptedPort::new());
        assert!(matches!(reader.write_ndef(b"x"), Err(HardwareError::TagLost)));
    }

    #[test]
    fn select_then_release() {
        let mut port = ScriptedPort::new();
        port.reply(
            CMD_IN_LIST_PASSIVE_TARGET,
            &[0x01, 0x01, 0x00, 0x44, 0x00, 0x07, 0x04, 0x5A, 0x1E, 0x22, 0x8C, 0x64, 0x80],
        );
        port.reply(CMD_IN_RELEASE, &[0x00]);
        let mut reader = Pn532::new(port);

        let id = reader.select_target().unwrap().unwrap();
        assert_eq!(id.to_string(), "045A1E228C6480");
        reader.release();

        let frames = reader.port_mut().sent_frames();
        assert_eq!(frames[1], vec![TFI_HOST, CMD_IN_RELEASE, 1]);
    }
}
