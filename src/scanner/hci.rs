//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    OBSERVATION_CHANNEL_BUFFER_SIZE, Observation, ObservationResult, ReportError, ScanError,
    parse_ad_structures,
};
use crate::mac_address::DeviceAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::SystemTime;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

/// Controller scanned by this backend (`hci0`).
const DEFAULT_DEVICE: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

/// Largest HCI event: 2 header bytes plus 255 parameter bytes, packet type included.
const MAX_EVENT_LEN: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side packet filter (`struct hci_filter`).
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Let only LE meta events through.
    fn le_meta_events() -> Self {
        let mut filter = Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.type_mask |= 1 << HCI_EVENT_PKT;
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

/// Parameters of the LE Set Scan Parameters command.
#[derive(Debug, Clone, Copy)]
struct ScanParameters {
    active: bool,
    /// In units of 0.625 ms
    interval: u16,
    /// In units of 0.625 ms
    window: u16,
}

impl ScanParameters {
    /// Passive scan, listening continuously in 10 ms slots.
    const PASSIVE: Self = Self {
        active: false,
        interval: 0x0010,
        window: 0x0010,
    };

    /// Command parameters: scan type, interval, window, own address type
    /// (public) and filter policy (accept all).
    fn to_bytes(self) -> [u8; 7] {
        let [interval_lo, interval_hi] = self.interval.to_le_bytes();
        let [window_lo, window_hi] = self.window.to_le_bytes();
        [
            u8::from(self.active),
            interval_lo,
            interval_hi,
            window_lo,
            window_hi,
            0x00,
            0x00,
        ]
    }
}

/// Encode an HCI command packet.
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn os_error(action: &str) -> ScanError {
    ScanError::Bluetooth(format!("{action}: {}", io::Error::last_os_error()))
}

/// Non-blocking raw HCI socket bound to one controller.
#[derive(Debug)]
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(device: u16) -> Result<Self, ScanError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: device,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error(&format!("Failed to bind HCI socket to hci{device}")));
        }

        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = hci_command_packet(ogf, ocf, params);
        let ret = unsafe {
            libc::write(
                self.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }

    fn set_scan_enable(&self, enable: bool) -> Result<(), ScanError> {
        // Duplicate filtering off: every repeat counts as a reception.
        self.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
    }

    fn start_scan(&self, parameters: ScanParameters) -> Result<(), ScanError> {
        self.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &parameters.to_bytes())?;
        self.set_scan_enable(true)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let ret = unsafe {
            libc::read(
                self.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Command socket that turns scanning off again when the scan ends.
#[derive(Debug)]
struct ScanSession(HciSocket);

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Err(e) = self.0.set_scan_enable(false) {
            log::warn!("could not stop LE scan: {e}");
        }
    }
}

/// Advertising event types of connectable advertisements (ADV_IND, ADV_DIRECT_IND)
const CONNECTABLE_EVENT_TYPES: [u8; 2] = [0x00, 0x01];

/// RSSI value reported when the controller has no reading
const RSSI_UNAVAILABLE: i8 = 127;

// event_type(1) + address_type(1) + address(6) + data_len(1)
const REPORT_HEADER_LEN: usize = 9;

/// Parse an LE Advertising Report event into one result per contained report.
///
/// `data` is the whole HCI packet, packet type byte included. Reports are laid
/// out one after another; a report that does not fit ends the parse with an
/// error for that report.
fn parse_advertising_report(data: &[u8], received_at: SystemTime) -> Vec<ObservationResult> {
    // Skip HCI header (1 byte packet type + 1 byte event code + 1 byte param len + 1 byte subevent)
    let Some(&num_reports) = data.get(4) else {
        return vec![Err(ReportError::Truncated(format!(
            "{} byte event without report count",
            data.len()
        )))];
    };

    let mut results = Vec::with_capacity(num_reports as usize);
    let mut report = &data[5..];

    for index in 0..num_reports {
        if report.len() < REPORT_HEADER_LEN {
            results.push(Err(ReportError::Truncated(format!(
                "report {index}: header needs {REPORT_HEADER_LEN} bytes, {} left",
                report.len()
            ))));
            break;
        }

        let event_type = report[0];
        let address_type = report[1];
        let data_len = report[8] as usize;

        // ad data + trailing RSSI byte
        if report.len() < REPORT_HEADER_LEN + data_len + 1 {
            results.push(Err(ReportError::Truncated(format!(
                "report {index}: {data_len} bytes of advertising data announced, {} left",
                report.len() - REPORT_HEADER_LEN
            ))));
            break;
        }

        let ad_data = &report[REPORT_HEADER_LEN..REPORT_HEADER_LEN + data_len];
        let rssi = report[REPORT_HEADER_LEN + data_len] as i8;

        let result = parse_ad_structures(ad_data).map(|mut parsed| {
            parsed.address = DeviceAddress::from_hci(address_type, &report[2..8]);
            parsed.connectable = CONNECTABLE_EVENT_TYPES.contains(&event_type);
            parsed.rssi = (rssi != RSSI_UNAVAILABLE).then_some(f64::from(rssi));
            Observation {
                data: parsed,
                received_at,
            }
        });
        results.push(result);

        report = &report[REPORT_HEADER_LEN + data_len + 1..];
    }

    results
}

/// Start a passive LE scan on `hci0` and stream every advertising report.
///
/// Report errors are logged and, with `verbose`, also sent down the channel.
/// Scanning is switched off again once the receiver is dropped or the socket
/// fails. Needs CAP_NET_RAW and CAP_NET_ADMIN (or root).
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let events = HciSocket::open(DEFAULT_DEVICE)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    // Commands go through their own socket so the event filter stays narrow.
    let commands = HciSocket::open(DEFAULT_DEVICE)?;
    commands.start_scan(ScanParameters::PASSIVE)?;
    let session = ScanSession(commands);
    log::info!("passive LE scan started on hci{DEFAULT_DEVICE}");

    let events = AsyncFd::new(events)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to register HCI socket: {e}")))?;
    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _session = session;
        let mut buf = [0u8; MAX_EVENT_LEN];

        loop {
            let mut guard = match events.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    log::warn!("HCI socket no longer readable: {e}");
                    break;
                }
            };

            // Drain every queued event before waiting again.
            loop {
                let n = match guard.try_io(|socket| socket.get_ref().read(&mut buf)) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        log::debug!("HCI read failed: {e}");
                        break;
                    }
                    Err(_would_block) => break,
                };

                if !is_advertising_report(&buf[..n]) {
                    continue;
                }

                let received_at = SystemTime::now();
                for result in parse_advertising_report(&buf[..n], received_at) {
                    if let Err(e) = &result {
                        log::warn!("dropping advertising report: {e}");
                        if !verbose {
                            continue;
                        }
                    }
                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    Ok(rx)
}

fn is_advertising_report(packet: &[u8]) -> bool {
    matches!(
        packet,
        [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, ..]
    )
}
