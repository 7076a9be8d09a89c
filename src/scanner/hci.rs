//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to receive BLE advertising
//! reports without the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError, ScanFuture, ScanMode, Transport};
use crate::advertisement::{Advertisement, uuid_from_u16};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Mutex, PoisonError};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// Scan interval and window, 10ms in 0.625ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

// AD types
const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

// Reported when the controller has no RSSI for the packet
const RSSI_UNAVAILABLE: i8 = 127;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters for LE Set Scan Parameters.
fn scan_parameters(mode: ScanMode) -> [u8; 7] {
    let scan_type = match mode {
        ScanMode::Active => LE_SCAN_ACTIVE,
        ScanMode::Passive => LE_SCAN_PASSIVE,
    };
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        scan_type,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

fn bluetooth_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // nix doesn't support BTPROTO_HCI, so go through libc directly.
    // SOCK_NONBLOCK is required for AsyncFd to work properly.
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(bluetooth_error("Failed to create HCI socket"));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(bluetooth_error("Failed to bind HCI socket"));
    }

    Ok(())
}

/// Only let LE meta events through
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(bluetooth_error("Failed to set HCI filter"));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(bluetooth_error("Failed to send HCI command"));
    }

    Ok(())
}

/// Enable or disable LE scanning. Duplicates are never filtered by the
/// controller: repeated broadcasts are how RSSI updates arrive.
fn set_scan_enable(fd: &OwnedFd, enable: bool) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00]);
    send_hci_command(fd, &packet)
}

/// Configure LE scanning parameters and start scanning
fn configure_le_scan(fd: &OwnedFd, mode: ScanMode) -> Result<(), ScanError> {
    // Parameters cannot change while a scan is running
    set_scan_enable(fd, false)?;
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters(mode));
    send_hci_command(fd, &packet)?;
    set_scan_enable(fd, true)
}

/// Split AD structures into service data and local name.
fn parse_ad_structures(ad_data: &[u8], advertisement: &mut Advertisement) {
    let mut offset = 0;
    while offset < ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_SERVICE_DATA_16 if value.len() >= 2 => {
                let uuid = uuid_from_u16(u16::from_le_bytes([value[0], value[1]]));
                advertisement.service_data.insert(uuid, value[2..].to_vec());
            }
            AD_TYPE_COMPLETE_NAME | AD_TYPE_SHORT_NAME => {
                // A complete name wins over a shortened one
                if ad_type == AD_TYPE_COMPLETE_NAME || advertisement.local_name.is_none() {
                    advertisement.local_name = Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            _ => {}
        }

        offset += 1 + len;
    }
}

/// Parse an LE advertising report event into advertisements.
///
/// `packet` is the raw HCI event including the packet type byte.
fn parse_advertising_report(packet: &[u8]) -> Vec<Advertisement> {
    // packet type(1) + event code(1) + param len(1) + subevent(1) + num reports(1)
    if packet.len() < 5
        || packet[0] != HCI_EVENT_PKT
        || packet[1] != EVT_LE_META_EVENT
        || packet[3] != EVT_LE_ADVERTISING_REPORT
    {
        return Vec::new();
    }

    let num_reports = packet[4] as usize;
    let mut reports = Vec::with_capacity(num_reports);
    let mut rest = &packet[5..];

    for _ in 0..num_reports {
        // event type(1) + address type(1) + address(6) + data length(1)
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse(); // HCI uses little-endian address

        let data_len = rest[8] as usize;
        // AD data plus the trailing RSSI byte
        if rest.len() < 9 + data_len + 1 {
            break;
        }

        let rssi = rest[9 + data_len] as i8;
        let mut advertisement = Advertisement {
            address: MacAddress(addr),
            service_data: HashMap::new(),
            rssi: (rssi != RSSI_UNAVAILABLE).then_some(i16::from(rssi)),
            local_name: None,
        };
        parse_ad_structures(&rest[9..9 + data_len], &mut advertisement);
        reports.push(advertisement);

        rest = &rest[9 + data_len + 1..];
    }

    reports
}

/// Read every pending packet from the socket, forwarding reports to `tx`.
async fn read_reports(async_fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<Advertisement>) {
    let mut buf = [0u8; 258]; // Max HCI event size

    loop {
        // Wait for the socket to be readable
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                log::warn!("HCI socket failed: {e}");
                break;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,  // EOF or empty read
                Ok(Err(_)) => break, // Read error
                Err(_) => break,     // WouldBlock - no more data
            };

            for advertisement in parse_advertising_report(&buf[..n]) {
                if tx.send(advertisement).await.is_err() {
                    return;
                }
            }
        }
    }
}

struct HciScan {
    task: JoinHandle<()>,
    cmd_fd: OwnedFd,
}

/// Transport reading advertising reports from an HCI device.
pub struct HciTransport {
    dev_id: u16,
    scan: Mutex<Option<HciScan>>,
}

impl HciTransport {
    /// Transport for `hci<dev_id>`.
    pub fn new(dev_id: u16) -> Self {
        Self {
            dev_id,
            scan: Mutex::new(None),
        }
    }

    fn open(&self, mode: ScanMode) -> Result<mpsc::Receiver<Advertisement>, ScanError> {
        // Socket for receiving events
        let fd = open_hci_socket()?;
        bind_hci_socket(&fd, self.dev_id)?;
        set_hci_filter(&fd)?;

        // Separate socket for sending commands
        let cmd_fd = open_hci_socket()?;
        bind_hci_socket(&cmd_fd, self.dev_id)?;
        configure_le_scan(&cmd_fd, mode)?;
        log::info!("scanning on hci{} ({mode} scan)", self.dev_id);

        let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
        let async_fd = AsyncFd::new(fd)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;
        let task = tokio::spawn(read_reports(async_fd, tx));

        let previous = self
            .scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(HciScan { task, cmd_fd });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        Ok(rx)
    }
}

impl Transport for HciTransport {
    fn start(&self, mode: ScanMode) -> ScanFuture<'_, mpsc::Receiver<Advertisement>> {
        Box::pin(std::future::ready(self.open(mode)))
    }

    fn stop(&self) -> ScanFuture<'_, ()> {
        let scan = self
            .scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Box::pin(async move {
            let Some(scan) = scan else {
                return Ok(());
            };
            scan.task.abort();
            let _ = scan.task.await;
            set_scan_enable(&scan.cmd_fd, false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::ATC_SERVICE_UUID;

    /// Build an LE advertising report event for one device.
    fn report_packet(addr: [u8; 6], ad_data: &[u8], rssi: i8) -> Vec<u8> {
        let mut reversed = addr;
        reversed.reverse();

        let mut params = vec![EVT_LE_ADVERTISING_REPORT, 0x01, 0x00, 0x00];
        params.extend_from_slice(&reversed);
        params.push(ad_data.len() as u8);
        params.extend_from_slice(ad_data);
        params.push(rssi as u8);

        let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, params.len() as u8];
        packet.extend_from_slice(&params);
        packet
    }

    fn atc_ad_data() -> Vec<u8> {
        let payload = [
            0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B, 0x64, 0x00, 0x80, 0x19, 0xE4, 0x0B, 0x3C, 0x01, 0x05,
        ];
        let mut ad = vec![0x02, 0x01, 0x06]; // flags
        ad.push((payload.len() + 3) as u8);
        ad.push(AD_TYPE_SERVICE_DATA_16);
        ad.extend_from_slice(&[0x1a, 0x18]);
        ad.extend_from_slice(&payload);
        ad.extend_from_slice(&[0x09, AD_TYPE_COMPLETE_NAME]);
        ad.extend_from_slice(b"ATC_995B");
        ad
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_scan_parameters_follow_mode() {
        assert_eq!(scan_parameters(ScanMode::Active)[0], LE_SCAN_ACTIVE);
        assert_eq!(scan_parameters(ScanMode::Passive)[0], LE_SCAN_PASSIVE);
        assert_eq!(&scan_parameters(ScanMode::Passive)[1..5], &[0x10, 0x00, 0x10, 0x00]);
    }

    #[test]
    fn test_parse_report_extracts_service_data_name_and_rssi() {
        let addr = [0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B];
        let reports = parse_advertising_report(&report_packet(addr, &atc_ad_data(), -70));

        assert_eq!(reports.len(), 1);
        let adv = &reports[0];
        assert_eq!(adv.address, MacAddress(addr));
        assert_eq!(adv.rssi, Some(-70));
        assert_eq!(adv.local_name.as_deref(), Some("ATC_995B"));
        let data = adv.service_data.get(&ATC_SERVICE_UUID).unwrap();
        assert_eq!(data.len(), 15);
        assert_eq!(&data[6..8], &[0x64, 0x00]);
    }

    #[test]
    fn test_parse_report_without_rssi() {
        let reports = parse_advertising_report(&report_packet([1, 2, 3, 4, 5, 6], &[0x02, 0x01, 0x06], 127));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rssi, None);
        assert!(reports[0].service_data.is_empty());
    }

    #[test]
    fn test_parse_report_rejects_truncated_packets() {
        let mut packet = report_packet([1, 2, 3, 4, 5, 6], &atc_ad_data(), -70);
        packet.truncate(packet.len() - 5);
        assert!(parse_advertising_report(&packet).is_empty());
        assert!(parse_advertising_report(&[HCI_EVENT_PKT, EVT_LE_META_EVENT]).is_empty());
    }

    #[test]
    fn test_parse_report_ignores_other_events() {
        let mut packet = report_packet([1, 2, 3, 4, 5, 6], &atc_ad_data(), -70);
        packet[3] = 0x01; // LE connection complete
        assert!(parse_advertising_report(&packet).is_empty());
    }

    #[test]
    fn test_malformed_ad_structure_stops_parsing() {
        let mut adv = Advertisement {
            address: MacAddress::default(),
            service_data: HashMap::new(),
            rssi: None,
            local_name: None,
        };
        // Second structure claims more bytes than remain
        parse_ad_structures(&[0x03, AD_TYPE_SHORT_NAME, b'A', b'T', 0x09, 0x16, 0x1a], &mut adv);
        assert_eq!(adv.local_name.as_deref(), Some("AT"));
        assert!(adv.service_data.is_empty());
    }
}
