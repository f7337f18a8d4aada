//! Binary codec for [`super::HostFrame`] / [`super::ClientFrame`]: a single
//! tag byte followed by a varint-encoded payload.

use super::{ClientFrame, HostFrame, WireCursor, WireUpdate};

const HOST_TAG_HELLO: u8 = 0;
const HOST_TAG_GRID: u8 = 1;
const HOST_TAG_SNAPSHOT: u8 = 2;
const HOST_TAG_DELTA: u8 = 3;
const HOST_TAG_HISTORY_BACKFILL: u8 = 4;
const HOST_TAG_SNAPSHOT_COMPLETE: u8 = 5;
const HOST_TAG_INPUT_ACK: u8 = 6;
const HOST_TAG_CURSOR: u8 = 7;
const HOST_TAG_HEARTBEAT: u8 = 8;
const HOST_TAG_SHUTDOWN: u8 = 9;

const UPDATE_TAG_CELL: u8 = 0;
const UPDATE_TAG_ROW: u8 = 1;
const UPDATE_TAG_ROW_SEGMENT: u8 = 2;
const UPDATE_TAG_RECT: u8 = 3;
const UPDATE_TAG_TRIM: u8 = 4;
const UPDATE_TAG_STYLE: u8 = 5;

const CLIENT_TAG_INPUT: u8 = 0;
const CLIENT_TAG_RESIZE: u8 = 1;
const CLIENT_TAG_REQUEST_BACKFILL: u8 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown frame tag: {0}")]
    UnknownFrameTag(u8),
    #[error("unknown update tag: {0}")]
    UnknownUpdateTag(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

pub fn encode_host_frame(frame: &HostFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    match frame {
        HostFrame::Hello {
            subscription,
            features,
        } => {
            buf.push(HOST_TAG_HELLO);
            write_var_u32(&mut buf, *subscription);
            write_var_u32(&mut buf, *features);
        }
        HostFrame::Grid {
            base_row,
            history_rows,
            cols,
            viewport_rows,
        } => {
            buf.push(HOST_TAG_GRID);
            write_var_u64(&mut buf, *base_row);
            write_var_u32(&mut buf, *history_rows);
            write_var_u32(&mut buf, *cols);
            buf.push(viewport_rows.is_some() as u8);
            if let Some(rows) = viewport_rows {
                write_var_u32(&mut buf, *rows);
            }
        }
        HostFrame::Snapshot { updates, cursor } => {
            buf.push(HOST_TAG_SNAPSHOT);
            encode_updates(&mut buf, updates);
            encode_optional_cursor(&mut buf, cursor);
        }
        HostFrame::Delta { updates, cursor } => {
            buf.push(HOST_TAG_DELTA);
            encode_updates(&mut buf, updates);
            encode_optional_cursor(&mut buf, cursor);
        }
        HostFrame::HistoryBackfill {
            range_start,
            range_end,
            updates,
            cursor,
        } => {
            buf.push(HOST_TAG_HISTORY_BACKFILL);
            write_var_u64(&mut buf, *range_start);
            write_var_u64(&mut buf, *range_end);
            encode_updates(&mut buf, updates);
            encode_optional_cursor(&mut buf, cursor);
        }
        HostFrame::SnapshotComplete => {
            buf.push(HOST_TAG_SNAPSHOT_COMPLETE);
        }
        HostFrame::InputAck { seq } => {
            buf.push(HOST_TAG_INPUT_ACK);
            write_var_u64(&mut buf, *seq);
        }
        HostFrame::Cursor { cursor } => {
            buf.push(HOST_TAG_CURSOR);
            encode_cursor(&mut buf, cursor);
        }
        HostFrame::Heartbeat { seq } => {
            buf.push(HOST_TAG_HEARTBEAT);
            write_var_u64(&mut buf, *seq);
        }
        HostFrame::Shutdown => {
            buf.push(HOST_TAG_SHUTDOWN);
        }
    }
    buf
}

pub fn decode_host_frame(bytes: &[u8]) -> Result<HostFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let tag = cursor.read_u8()?;
    match tag {
        HOST_TAG_HELLO => {
            let subscription = cursor.read_var_u32()?;
            let features = cursor.read_var_u32()?;
            Ok(HostFrame::Hello {
                subscription,
                features,
            })
        }
        HOST_TAG_GRID => {
            let base_row = cursor.read_var_u64()?;
            let history_rows = cursor.read_var_u32()?;
            let cols = cursor.read_var_u32()?;
            let has_viewport_rows = cursor.read_bool()?;
            let viewport_rows = if has_viewport_rows {
                Some(cursor.read_var_u32()?)
            } else {
                None
            };
            Ok(HostFrame::Grid {
                base_row,
                history_rows,
                cols,
                viewport_rows,
            })
        }
        HOST_TAG_SNAPSHOT => {
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::Snapshot {
                updates,
                cursor: cursor_frame,
            })
        }
        HOST_TAG_DELTA => {
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::Delta {
                updates,
                cursor: cursor_frame,
            })
        }
        HOST_TAG_HISTORY_BACKFILL => {
            let range_start = cursor.read_var_u64()?;
            let range_end = cursor.read_var_u64()?;
            let updates = decode_updates(&mut cursor)?;
            let cursor_frame = decode_optional_cursor(&mut cursor)?;
            Ok(HostFrame::HistoryBackfill {
                range_start,
                range_end,
                updates,
                cursor: cursor_frame,
            })
        }
        HOST_TAG_SNAPSHOT_COMPLETE => Ok(HostFrame::SnapshotComplete),
        HOST_TAG_INPUT_ACK => {
            let seq = cursor.read_var_u64()?;
            Ok(HostFrame::InputAck { seq })
        }
        HOST_TAG_CURSOR => {
            let cursor_frame = decode_cursor(&mut cursor)?;
            Ok(HostFrame::Cursor {
                cursor: cursor_frame,
            })
        }
        HOST_TAG_HEARTBEAT => {
            let seq = cursor.read_var_u64()?;
            Ok(HostFrame::Heartbeat { seq })
        }
        HOST_TAG_SHUTDOWN => Ok(HostFrame::Shutdown),
        other => Err(WireError::UnknownFrameTag(other)),
    }
}

pub fn encode_client_frame(frame: &ClientFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    match frame {
        ClientFrame::Input { seq, data } => {
            buf.push(CLIENT_TAG_INPUT);
            write_var_u64(&mut buf, *seq);
            write_var_u32(&mut buf, data.len() as u32);
            buf.extend_from_slice(data);
        }
        ClientFrame::Resize { cols, rows } => {
            buf.push(CLIENT_TAG_RESIZE);
            write_var_u32(&mut buf, *cols);
            write_var_u32(&mut buf, *rows);
        }
        ClientFrame::RequestBackfill { start_row, count } => {
            buf.push(CLIENT_TAG_REQUEST_BACKFILL);
            write_var_u64(&mut buf, *start_row);
            write_var_u32(&mut buf, *count);
        }
    }
    buf
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<ClientFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let tag = cursor.read_u8()?;
    match tag {
        CLIENT_TAG_INPUT => {
            let seq = cursor.read_var_u64()?;
            let len = cursor.read_var_u32()? as usize;
            let data = cursor.read_bytes(len)?.to_vec();
            Ok(ClientFrame::Input { seq, data })
        }
        CLIENT_TAG_RESIZE => {
            let cols = cursor.read_var_u32()?;
            let rows = cursor.read_var_u32()?;
            Ok(ClientFrame::Resize { cols, rows })
        }
        CLIENT_TAG_REQUEST_BACKFILL => {
            let start_row = cursor.read_var_u64()?;
            let count = cursor.read_var_u32()?;
            Ok(ClientFrame::RequestBackfill { start_row, count })
        }
        other => Err(WireError::UnknownFrameTag(other)),
    }
}

fn encode_updates(buf: &mut Vec<u8>, updates: &[WireUpdate]) {
    write_var_u32(buf, updates.len() as u32);
    for update in updates {
        match update {
            WireUpdate::Cell { row, col, seq, cell } => {
                buf.push(UPDATE_TAG_CELL);
                write_var_u64(buf, *row);
                write_var_u32(buf, *col);
                write_var_u64(buf, *seq);
                write_var_u64(buf, *cell);
            }
            WireUpdate::Row { row, seq, cells } => {
                buf.push(UPDATE_TAG_ROW);
                write_var_u64(buf, *row);
                write_var_u64(buf, *seq);
                write_var_u32(buf, cells.len() as u32);
                for cell in cells {
                    write_var_u64(buf, *cell);
                }
            }
            WireUpdate::RowSegment {
                row,
                start_col,
                seq,
                cells,
            } => {
                buf.push(UPDATE_TAG_ROW_SEGMENT);
                write_var_u64(buf, *row);
                write_var_u32(buf, *start_col);
                write_var_u64(buf, *seq);
                write_var_u32(buf, cells.len() as u32);
                for cell in cells {
                    write_var_u64(buf, *cell);
                }
            }
            WireUpdate::Rect {
                row_start,
                row_end,
                col_start,
                col_end,
                seq,
                cell,
            } => {
                buf.push(UPDATE_TAG_RECT);
                write_var_u64(buf, *row_start);
                write_var_u64(buf, *row_end);
                write_var_u32(buf, *col_start);
                write_var_u32(buf, *col_end);
                write_var_u64(buf, *seq);
                write_var_u64(buf, *cell);
            }
            WireUpdate::Trim { start, count } => {
                buf.push(UPDATE_TAG_TRIM);
                write_var_u64(buf, *start);
                write_var_u64(buf, *count);
            }
            WireUpdate::Style {
                id,
                seq,
                fg,
                bg,
                attrs,
            } => {
                buf.push(UPDATE_TAG_STYLE);
                write_var_u32(buf, *id);
                write_var_u64(buf, *seq);
                write_var_u32(buf, *fg);
                write_var_u32(buf, *bg);
                buf.push(*attrs);
            }
        }
    }
}

fn decode_updates(cursor: &mut Cursor<'_>) -> Result<Vec<WireUpdate>, WireError> {
    let count = cursor.read_var_u32()? as usize;
    let mut updates = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = cursor.read_u8()?;
        let update = match tag {
            UPDATE_TAG_CELL => {
                let row = cursor.read_var_u64()?;
                let col = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let cell = cursor.read_var_u64()?;
                WireUpdate::Cell { row, col, seq, cell }
            }
            UPDATE_TAG_ROW => {
                let row = cursor.read_var_u64()?;
                let seq = cursor.read_var_u64()?;
                let len = cursor.read_var_u32()? as usize;
                let mut cells = Vec::with_capacity(len);
                for _ in 0..len {
                    cells.push(cursor.read_var_u64()?);
                }
                WireUpdate::Row { row, seq, cells }
            }
            UPDATE_TAG_ROW_SEGMENT => {
                let row = cursor.read_var_u64()?;
                let start_col = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let len = cursor.read_var_u32()? as usize;
                let mut cells = Vec::with_capacity(len);
                for _ in 0..len {
                    cells.push(cursor.read_var_u64()?);
                }
                WireUpdate::RowSegment {
                    row,
                    start_col,
                    seq,
                    cells,
                }
            }
            UPDATE_TAG_RECT => {
                let row_start = cursor.read_var_u64()?;
                let row_end = cursor.read_var_u64()?;
                let col_start = cursor.read_var_u32()?;
                let col_end = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let cell = cursor.read_var_u64()?;
                WireUpdate::Rect {
                    row_start,
                    row_end,
                    col_start,
                    col_end,
                    seq,
                    cell,
                }
            }
            UPDATE_TAG_TRIM => {
                let start = cursor.read_var_u64()?;
                let count = cursor.read_var_u64()?;
                WireUpdate::Trim { start, count }
            }
            UPDATE_TAG_STYLE => {
                let id = cursor.read_var_u32()?;
                let seq = cursor.read_var_u64()?;
                let fg = cursor.read_var_u32()?;
                let bg = cursor.read_var_u32()?;
                let attrs = cursor.read_u8()?;
                WireUpdate::Style {
                    id,
                    seq,
                    fg,
                    bg,
                    attrs,
                }
            }
            other => return Err(WireError::UnknownUpdateTag(other)),
        };
        updates.push(update);
    }
    Ok(updates)
}

fn encode_cursor(buf: &mut Vec<u8>, cursor: &WireCursor) {
    write_var_u64(buf, cursor.row);
    write_var_u32(buf, cursor.col);
    write_var_u64(buf, cursor.seq);
    buf.push(cursor.visible as u8);
    buf.push(cursor.blink as u8);
}

fn decode_cursor(cursor: &mut Cursor<'_>) -> Result<WireCursor, WireError> {
    let row = cursor.read_var_u64()?;
    let col = cursor.read_var_u32()?;
    let seq = cursor.read_var_u64()?;
    let visible = cursor.read_bool()?;
    let blink = cursor.read_bool()?;
    Ok(WireCursor {
        row,
        col,
        seq,
        visible,
        blink,
    })
}

fn encode_optional_cursor(buf: &mut Vec<u8>, cursor: &Option<WireCursor>) {
    buf.push(cursor.is_some() as u8);
    if let Some(frame) = cursor {
        encode_cursor(buf, frame);
    }
}

fn decode_optional_cursor(cursor: &mut Cursor<'_>) -> Result<Option<WireCursor>, WireError> {
    if cursor.read_bool()? {
        Ok(Some(decode_cursor(cursor)?))
    } else {
        Ok(None)
    }
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

#[derive(Clone, Copy)]
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidData("invalid boolean")),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.pos + len > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn encode_decode_hello() {
        let frame = HostFrame::Hello {
            subscription: 7,
            features: super::super::FEATURE_CURSOR_SYNC,
        };
        let encoded = encode_host_frame(&frame);
        assert_eq!(decode_host_frame(&encoded).expect("decode"), frame);
    }

    #[test_timeout::timeout]
    fn encode_decode_grid_without_viewport_rows() {
        let frame = HostFrame::Grid {
            base_row: 91,
            history_rows: 62,
            cols: 80,
            viewport_rows: None,
        };
        let encoded = encode_host_frame(&frame);
        assert_eq!(decode_host_frame(&encoded).expect("decode"), frame);
    }

    #[test_timeout::timeout]
    fn encode_decode_snapshot_with_updates_and_cursor() {
        let frame = HostFrame::Snapshot {
            updates: vec![
                WireUpdate::Cell {
                    row: 3,
                    col: 4,
                    seq: 10,
                    cell: 0xDEAD_BEEF,
                },
                WireUpdate::Row {
                    row: 5,
                    seq: 12,
                    cells: vec![0, 1, 2],
                },
                WireUpdate::RowSegment {
                    row: 6,
                    start_col: 2,
                    seq: 13,
                    cells: vec![9, 9, 9, 9],
                },
                WireUpdate::Rect {
                    row_start: 7,
                    row_end: 9,
                    col_start: 0,
                    col_end: 80,
                    seq: 14,
                    cell: 0x20,
                },
                WireUpdate::Style {
                    id: 7,
                    seq: 15,
                    fg: 0x0102_0300,
                    bg: 0x0405_0600,
                    attrs: 0b1010_1010,
                },
                WireUpdate::Trim { start: 1, count: 2 },
            ],
            cursor: Some(WireCursor {
                row: 6,
                col: 6,
                seq: 16,
                visible: true,
                blink: false,
            }),
        };
        let encoded = encode_host_frame(&frame);
        assert_eq!(decode_host_frame(&encoded).expect("decode"), frame);
    }

    #[test_timeout::timeout]
    fn encode_decode_history_backfill() {
        let frame = HostFrame::HistoryBackfill {
            range_start: 5,
            range_end: 7,
            updates: vec![WireUpdate::Cell {
                row: 5,
                col: 0,
                seq: 1,
                cell: 0x0002,
            }],
            cursor: None,
        };
        let encoded = encode_host_frame(&frame);
        assert_eq!(decode_host_frame(&encoded).expect("decode"), frame);
    }

    #[test_timeout::timeout]
    fn encode_decode_client_frames() {
        let input = ClientFrame::Input {
            seq: 99,
            data: vec![1, 2, 3, 4],
        };
        let resize = ClientFrame::Resize { cols: 80, rows: 24 };
        let backfill = ClientFrame::RequestBackfill {
            start_row: 10,
            count: 64,
        };

        for frame in [input, resize, backfill] {
            let encoded = encode_client_frame(&frame);
            assert_eq!(decode_client_frame(&encoded).expect("decode"), frame);
        }
    }

    #[test_timeout::timeout]
    fn decode_rejects_unknown_frame_tag() {
        assert_eq!(
            decode_host_frame(&[200]),
            Err(WireError::UnknownFrameTag(200))
        );
    }

    #[test_timeout::timeout]
    fn decode_rejects_truncated_input() {
        assert_eq!(
            decode_host_frame(&[HOST_TAG_HEARTBEAT]),
            Err(WireError::UnexpectedEof)
        );
    }
}
