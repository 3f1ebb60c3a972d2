//! BLE fragmentation/reassembly — adapts arbitrary-length messages to a
//! fixed-MTU characteristic.
//!
//! Framing: one header byte per raw buffer, top two bits classify the
//! fragment, bottom six bits are informational only (never relied on for
//! length — the transport's buffer length is authoritative).

/// BLE characteristic MTU in bytes, header included.
pub const MTU: usize = 20;

const HDR_CONTINUATION: u8 = 0b00 << 6;
const HDR_START: u8 = 0b10 << 6;
const HDR_END: u8 = 0b01 << 6;
const HDR_SOLO: u8 = 0b11 << 6;
const HDR_MASK: u8 = 0b11 << 6;
const SIZE_MASK: u8 = !HDR_MASK;

fn header_byte(kind: u8, payload_len: usize) -> u8 {
    kind | (payload_len as u8 & SIZE_MASK)
}

/// Split a message into MTU-sized raw buffers ready for the BLE characteristic.
///
/// Emits `max(1, ceil(L / (MTU-1)))` buffers, each at most `MTU` bytes.
pub fn send(message: &[u8]) -> Vec<Vec<u8>> {
    let chunk_cap = MTU - 1;
    if message.is_empty() {
        return vec![vec![header_byte(HDR_SOLO, 0)]];
    }

    let chunks: Vec<&[u8]> = message.chunks(chunk_cap).collect();
    let last = chunks.len() - 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let kind = if chunks_len_one(last) {
                HDR_SOLO
            } else if i == 0 {
                HDR_START
            } else if i == last {
                HDR_END
            } else {
                HDR_CONTINUATION
            };
            let mut buf = Vec::with_capacity(1 + chunk.len());
            buf.push(header_byte(kind, chunk.len()));
            buf.extend_from_slice(chunk);
            buf
        })
        .collect()
}

fn chunks_len_one(last_index: usize) -> bool {
    last_index == 0
}

/// Outcome of feeding one raw buffer into a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The message is still being assembled; more fragments are expected.
    Pending,
    /// A complete message was assembled and is ready for delivery.
    Complete(Vec<u8>),
    /// The fragment was dropped — an orphan continuation/end with no
    /// in-progress buffer, or oversized reassembly. Reported upward as an
    /// abnormality by the caller, not fatal.
    Abnormality,
}

/// Reassembles raw BLE buffers for one BLE connection into whole messages.
pub struct Reassembler {
    in_progress: Option<Vec<u8>>,
    max_message_len: usize,
}

impl Reassembler {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            in_progress: None,
            max_message_len,
        }
    }

    /// Feed one raw buffer received from the transport.
    pub fn feed(&mut self, buf: &[u8]) -> FeedOutcome {
        let Some(&header) = buf.first() else {
            return FeedOutcome::Abnormality;
        };
        let kind = header & HDR_MASK;
        let payload = &buf[1..];

        match kind {
            HDR_START | HDR_SOLO => {
                let mut msg = Vec::with_capacity(payload.len());
                msg.extend_from_slice(payload);
                if msg.len() > self.max_message_len {
                    self.in_progress = None;
                    return FeedOutcome::Abnormality;
                }
                if kind == HDR_SOLO {
                    self.in_progress = None;
                    FeedOutcome::Complete(msg)
                } else {
                    self.in_progress = Some(msg);
                    FeedOutcome::Pending
                }
            }
            HDR_CONTINUATION | HDR_END => {
                let Some(mut msg) = self.in_progress.take() else {
                    return FeedOutcome::Abnormality;
                };
                msg.extend_from_slice(payload);
                if msg.len() > self.max_message_len {
                    return FeedOutcome::Abnormality;
                }
                if kind == HDR_END {
                    FeedOutcome::Complete(msg)
                } else {
                    self.in_progress = Some(msg);
                    FeedOutcome::Pending
                }
            }
            _ => unreachable!("only two bits are used for the header kind"),
        }
    }

    /// Discard any in-progress buffer, e.g. on session restart.
    pub fn reset(&mut self) {
        self.in_progress = None;
    }
}
