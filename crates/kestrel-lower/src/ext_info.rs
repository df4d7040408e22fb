//! Ext-info wire format.
//!
//! An ext-info block is a flat sequence of records, each a native-endian
//! `u32` type, a `u32` payload length and the payload itself. The block is
//! owned by [`ExtInfoHandler`]; parsed records are stored as offsets into
//! that buffer and every update writes through them, so the bytes handed to
//! the device are always the handler's own buffer.

use bytemuck::{Pod, Zeroable};

use crate::{Error, Result};

pub const INFO_TYPE_SHAPE_TYPE: u32 = 0;
pub const INFO_TYPE_INPUT_SHAPE: u32 = 1;
pub const INFO_TYPE_OUTPUT_SHAPE: u32 = 2;
pub const INFO_TYPE_UPDATE_ADDR: u32 = 3;
pub const INFO_TYPE_OP_NAME: u32 = 4;
pub const INFO_TYPE_SESSION_INFO: u32 = 5;
pub const INFO_TYPE_BITMAP: u32 = 6;
pub const INFO_TYPE_TOPIC_TYPE: u32 = 7;
pub const INFO_TYPE_ASYNC_WAIT: u32 = 8;
pub const INFO_TYPE_WORKSPACE: u32 = 11;

/// Dimension slots per shape record.
pub const MAX_SHAPE_DIMS: usize = 8;

/// Value of an unused dimension slot.
pub const DIM_END: i64 = i64::MIN;

/// Bitmap flag: kernel runs a single standalone operator.
pub const BITMAP_SINGLE_OP: u64 = 1;

const HEADER_LEN: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ShapeAndType {
    pub dtype: i32,
    pub reserved: u32,
    pub dims: [i64; MAX_SHAPE_DIMS],
}

impl ShapeAndType {
    /// Shape record for `dims`. Fails for ranks above [`MAX_SHAPE_DIMS`].
    pub fn new(dtype: i32, dims: &[i64]) -> Option<Self> {
        if dims.len() > MAX_SHAPE_DIMS {
            return None;
        }
        let mut slots = [DIM_END; MAX_SHAPE_DIMS];
        slots[..dims.len()].copy_from_slice(dims);
        Some(Self {
            dtype,
            reserved: 0,
            dims: slots,
        })
    }

    /// Dimensions up to the first unused slot.
    pub fn dims(&self) -> Vec<i64> {
        self.dims.iter().copied().take_while(|&d| d != DIM_END).collect()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct SessionInfo {
    pub session_id: u64,
    pub kernel_id: u64,
    pub sess_flag: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct AsyncWait {
    pub wait_type: u8,
    pub reserved: [u8; 3],
    pub wait_id: u32,
    pub timeout: u64,
    pub reserved2: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct WorkspaceInfo {
    pub size: u64,
    pub addr: u64,
}

const SHAPE_LEN: usize = size_of::<ShapeAndType>();

/// Parsed, mutable view over an owned ext-info block.
#[derive(Debug, Clone)]
pub struct ExtInfoHandler {
    node_name: String,
    buf: Vec<u8>,
    input_num: usize,
    output_num: usize,
    records: usize,
    shape_type: Option<usize>,
    input_shapes: Option<usize>,
    output_shapes: Option<usize>,
    update_addr: Option<usize>,
    op_name: Option<(usize, usize)>,
    session_info: Option<usize>,
    bitmap: Option<usize>,
    topic_type: Option<usize>,
    async_wait: Option<usize>,
    workspace: Option<usize>,
}

impl ExtInfoHandler {
    /// Copy `bytes` and parse the records in place.
    ///
    /// Every known record must have exactly its fixed length and the records
    /// must cover the block exactly. Unknown record types are skipped.
    pub fn parse(
        node_name: &str,
        bytes: &[u8],
        input_num: usize,
        output_num: usize,
    ) -> Result<Self> {
        let mut handler = Self {
            node_name: node_name.to_string(),
            buf: bytes.to_vec(),
            input_num,
            output_num,
            records: 0,
            shape_type: None,
            input_shapes: None,
            output_shapes: None,
            update_addr: None,
            op_name: None,
            session_info: None,
            bitmap: None,
            topic_type: None,
            async_wait: None,
            workspace: None,
        };

        let total = handler.buf.len();
        let mut offset = 0;
        while offset < total {
            let header = handler.buf.get(offset..offset + HEADER_LEN).ok_or_else(|| {
                handler.malformed(format!(
                    "truncated record header at offset {offset} of {total}"
                ))
            })?;
            let info_type: u32 = bytemuck::pod_read_unaligned(&header[..4]);
            let info_len = bytemuck::pod_read_unaligned::<u32>(&header[4..]) as usize;
            let payload = offset + HEADER_LEN;
            if payload + info_len > total {
                return Err(handler.malformed(format!(
                    "record type {info_type} at offset {offset} declares {info_len} bytes, \
                     only {} remain",
                    total - payload
                )));
            }
            handler.record(info_type, payload, info_len)?;
            handler.records += 1;
            offset = payload + info_len;
        }

        if offset != total {
            return Err(handler.malformed(format!("consumed {offset} bytes of {total}")));
        }
        Ok(handler)
    }

    fn record(&mut self, info_type: u32, offset: usize, len: usize) -> Result<()> {
        let expected = match info_type {
            INFO_TYPE_SHAPE_TYPE | INFO_TYPE_UPDATE_ADDR | INFO_TYPE_TOPIC_TYPE => 4,
            INFO_TYPE_INPUT_SHAPE => self.input_num * SHAPE_LEN,
            INFO_TYPE_OUTPUT_SHAPE => self.output_num * SHAPE_LEN,
            INFO_TYPE_SESSION_INFO => size_of::<SessionInfo>(),
            INFO_TYPE_BITMAP => 8,
            INFO_TYPE_ASYNC_WAIT => size_of::<AsyncWait>(),
            INFO_TYPE_WORKSPACE => size_of::<WorkspaceInfo>(),
            INFO_TYPE_OP_NAME => {
                self.op_name = Some((offset, len));
                return Ok(());
            }
            _ => {
                tracing::debug!(node = %self.node_name, info_type, len, "skipping unknown ext-info record");
                return Ok(());
            }
        };
        if len != expected {
            return Err(self.malformed(format!(
                "record type {info_type} has length {len}, expected {expected}"
            )));
        }

        let slot = match info_type {
            INFO_TYPE_SHAPE_TYPE => &mut self.shape_type,
            INFO_TYPE_INPUT_SHAPE => &mut self.input_shapes,
            INFO_TYPE_OUTPUT_SHAPE => &mut self.output_shapes,
            INFO_TYPE_UPDATE_ADDR => &mut self.update_addr,
            INFO_TYPE_SESSION_INFO => &mut self.session_info,
            INFO_TYPE_BITMAP => &mut self.bitmap,
            INFO_TYPE_TOPIC_TYPE => &mut self.topic_type,
            INFO_TYPE_ASYNC_WAIT => &mut self.async_wait,
            _ => &mut self.workspace,
        };
        *slot = Some(offset);
        Ok(())
    }

    fn malformed(&self, message: String) -> Error {
        Error::MalformedExtInfo {
            node: self.node_name.clone(),
            message,
        }
    }

    fn read<T: Pod>(&self, offset: usize) -> Option<T> {
        self.buf
            .get(offset..offset + size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    fn write<T: Pod>(&mut self, offset: usize, value: &T) -> Result<()> {
        let end = offset + size_of::<T>();
        if end > self.buf.len() {
            return Err(self.malformed(format!(
                "write of {} bytes at {offset} exceeds {}",
                size_of::<T>(),
                self.buf.len()
            )));
        }
        self.buf[offset..end].copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// The whole block, including every update applied so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of records in the block, known or not.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn input_num(&self) -> usize {
        self.input_num
    }

    pub fn output_num(&self) -> usize {
        self.output_num
    }

    pub fn shape_type(&self) -> Option<i32> {
        self.read(self.shape_type?)
    }

    pub fn input_shape(&self, index: usize) -> Option<ShapeAndType> {
        if index >= self.input_num {
            return None;
        }
        self.read(self.input_shapes? + index * SHAPE_LEN)
    }

    pub fn output_shape(&self, index: usize) -> Option<ShapeAndType> {
        if index >= self.output_num {
            return None;
        }
        self.read(self.output_shapes? + index * SHAPE_LEN)
    }

    pub fn update_addr(&self) -> Option<u32> {
        self.read(self.update_addr?)
    }

    pub fn op_name(&self) -> Option<&str> {
        let (offset, len) = self.op_name?;
        std::str::from_utf8(self.buf.get(offset..offset + len)?).ok()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.read(self.session_info?)
    }

    pub fn bitmap(&self) -> Option<u64> {
        self.read(self.bitmap?)
    }

    pub fn topic_type(&self) -> Option<i32> {
        self.read(self.topic_type?)
    }

    pub fn async_wait(&self) -> Option<AsyncWait> {
        self.read(self.async_wait?)
    }

    pub fn workspace(&self) -> Option<WorkspaceInfo> {
        self.read(self.workspace?)
    }

    pub fn has_workspace(&self) -> bool {
        self.workspace.is_some()
    }

    fn update_shape(&mut self, base: Option<usize>, count: usize, index: usize, dims: &[i64]) -> Result<()> {
        let Some(base) = base else {
            return Ok(());
        };
        if index >= count {
            return Err(self.malformed(format!("shape index {index} out of range for {count} shapes")));
        }
        let offset = base + index * SHAPE_LEN;
        let mut shape: ShapeAndType = self
            .read(offset)
            .ok_or_else(|| self.malformed(format!("shape record at {offset} out of bounds")))?;
        let updated = ShapeAndType::new(shape.dtype, dims).ok_or_else(|| {
            self.malformed(format!("rank {} exceeds {MAX_SHAPE_DIMS} dimension slots", dims.len()))
        })?;
        shape.dims = updated.dims;
        self.write(offset, &shape)
    }

    /// Overwrite the dimensions of input `index`, keeping its dtype.
    pub fn update_input_shape(&mut self, index: usize, dims: &[i64]) -> Result<()> {
        self.update_shape(self.input_shapes, self.input_num, index, dims)
    }

    /// Overwrite the dimensions of output `index`, keeping its dtype.
    pub fn update_output_shape(&mut self, index: usize, dims: &[i64]) -> Result<()> {
        self.update_shape(self.output_shapes, self.output_num, index, dims)
    }

    /// Returns `false` when the block has no session record.
    pub fn update_session_info(&mut self, session_id: u64, kernel_id: u64) -> Result<bool> {
        let Some(offset) = self.session_info else {
            return Ok(false);
        };
        let info = SessionInfo {
            session_id,
            kernel_id,
            sess_flag: 1,
            reserved: [0; 7],
        };
        self.write(offset, &info)?;
        Ok(true)
    }

    pub fn update_bitmap(&mut self, bitmap: u64) -> Result<bool> {
        let Some(offset) = self.bitmap else {
            return Ok(false);
        };
        self.write(offset, &bitmap)?;
        Ok(true)
    }

    pub fn update_workspace(&mut self, size: u64, addr: u64) -> Result<bool> {
        let Some(offset) = self.workspace else {
            return Ok(false);
        };
        self.write(offset, &WorkspaceInfo { size, addr })?;
        Ok(true)
    }

    pub fn update_async_wait(&mut self, wait_type: u8, wait_id: u32, timeout: u64) -> Result<bool> {
        let Some(offset) = self.async_wait else {
            return Ok(false);
        };
        let wait = AsyncWait {
            wait_type,
            wait_id,
            timeout,
            ..Default::default()
        };
        self.write(offset, &wait)?;
        Ok(true)
    }
}

/// Writer for ext-info blocks.
#[derive(Debug, Clone, Default)]
pub struct ExtInfoBuilder {
    buf: Vec<u8>,
}

impl ExtInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw record.
    pub fn record(mut self, info_type: u32, payload: &[u8]) -> Self {
        self.buf.extend_from_slice(&info_type.to_ne_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self
    }

    pub fn shape_type(self, shape_type: i32) -> Self {
        self.record(INFO_TYPE_SHAPE_TYPE, bytemuck::bytes_of(&shape_type))
    }

    pub fn input_shapes(self, shapes: &[ShapeAndType]) -> Self {
        self.record(INFO_TYPE_INPUT_SHAPE, bytemuck::cast_slice(shapes))
    }

    pub fn output_shapes(self, shapes: &[ShapeAndType]) -> Self {
        self.record(INFO_TYPE_OUTPUT_SHAPE, bytemuck::cast_slice(shapes))
    }

    pub fn update_addr(self, flag: u32) -> Self {
        self.record(INFO_TYPE_UPDATE_ADDR, bytemuck::bytes_of(&flag))
    }

    pub fn op_name(self, name: &str) -> Self {
        self.record(INFO_TYPE_OP_NAME, name.as_bytes())
    }

    pub fn session_info(self, info: SessionInfo) -> Self {
        self.record(INFO_TYPE_SESSION_INFO, bytemuck::bytes_of(&info))
    }

    pub fn bitmap(self, bitmap: u64) -> Self {
        self.record(INFO_TYPE_BITMAP, bytemuck::bytes_of(&bitmap))
    }

    pub fn topic_type(self, topic: i32) -> Self {
        self.record(INFO_TYPE_TOPIC_TYPE, bytemuck::bytes_of(&topic))
    }

    pub fn async_wait(self, wait: AsyncWait) -> Self {
        self.record(INFO_TYPE_ASYNC_WAIT, bytemuck::bytes_of(&wait))
    }

    pub fn workspace(self, workspace: WorkspaceInfo) -> Self {
        self.record(INFO_TYPE_WORKSPACE, bytemuck::bytes_of(&workspace))
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[i64]) -> ShapeAndType {
        ShapeAndType::new(3, dims).unwrap()
    }

    fn full_block() -> Vec<u8> {
        ExtInfoBuilder::new()
            .shape_type(3)
            .input_shapes(&[shape(&[2, 3]), shape(&[-1])])
            .output_shapes(&[shape(&[-1, 3])])
            .update_addr(1)
            .op_name("gather")
            .session_info(SessionInfo::default())
            .bitmap(0)
            .topic_type(2)
            .async_wait(AsyncWait::default())
            .record(42, &[1, 2, 3])
            .workspace(WorkspaceInfo::default())
            .build()
    }

    #[test]
    fn test_struct_layouts() {
        assert_eq!(size_of::<ShapeAndType>(), 72);
        assert_eq!(size_of::<SessionInfo>(), 24);
        assert_eq!(size_of::<AsyncWait>(), 24);
        assert_eq!(size_of::<WorkspaceInfo>(), 16);
    }

    #[test]
    fn test_parse_every_record() {
        let bytes = full_block();
        let handler = ExtInfoHandler::parse("gather", &bytes, 2, 1).unwrap();

        assert_eq!(handler.len(), bytes.len());
        assert_eq!(handler.as_bytes(), &bytes[..]);
        assert_eq!(handler.record_count(), 11);
        assert_eq!(handler.shape_type(), Some(3));
        assert_eq!(handler.input_shape(0).unwrap().dims(), vec![2, 3]);
        assert_eq!(handler.input_shape(1).unwrap().dims(), vec![-1]);
        assert_eq!(handler.output_shape(0).unwrap().dims(), vec![-1, 3]);
        assert!(handler.output_shape(1).is_none());
        assert_eq!(handler.update_addr(), Some(1));
        assert_eq!(handler.op_name(), Some("gather"));
        assert_eq!(handler.topic_type(), Some(2));
        assert!(handler.has_workspace());
    }

    #[test]
    fn test_parse_is_pure() {
        let bytes = full_block();
        let first = ExtInfoHandler::parse("n", &bytes, 2, 1).unwrap();
        let second = ExtInfoHandler::parse("n", first.as_bytes(), 2, 1).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.session_info(), second.session_info());
        assert_eq!(first.output_shape(0), second.output_shape(0));
    }

    #[test]
    fn test_updates_write_through() {
        let mut handler = ExtInfoHandler::parse("n", &full_block(), 2, 1).unwrap();
        handler.update_output_shape(0, &[5, 3]).unwrap();
        assert!(handler.update_session_info(7, 9).unwrap());
        assert!(handler.update_bitmap(BITMAP_SINGLE_OP).unwrap());
        assert!(handler.update_workspace(4096, 0xdead).unwrap());

        let reparsed = ExtInfoHandler::parse("n", handler.as_bytes(), 2, 1).unwrap();
        let out = reparsed.output_shape(0).unwrap();
        assert_eq!(out.dims(), vec![5, 3]);
        assert_eq!(out.dtype, 3);
        let session = reparsed.session_info().unwrap();
        assert_eq!((session.session_id, session.kernel_id), (7, 9));
        assert_eq!(reparsed.bitmap(), Some(BITMAP_SINGLE_OP));
        assert_eq!(reparsed.workspace().unwrap().size, 4096);
    }

    #[test]
    fn test_missing_record_updates_are_noops() {
        let bytes = ExtInfoBuilder::new().shape_type(1).build();
        let mut handler = ExtInfoHandler::parse("n", &bytes, 0, 0).unwrap();
        assert!(!handler.update_session_info(1, 1).unwrap());
        assert!(!handler.update_workspace(1, 1).unwrap());
        assert_eq!(handler.as_bytes(), &bytes[..]);
    }

    #[test]
    fn test_rejects_wrong_record_length() {
        let bytes = ExtInfoBuilder::new().record(INFO_TYPE_BITMAP, &[0; 4]).build();
        let err = ExtInfoHandler::parse("bad", &bytes, 0, 0).unwrap_err();
        assert!(matches!(err, Error::MalformedExtInfo { ref node, .. } if node == "bad"));
    }

    #[test]
    fn test_rejects_shape_count_mismatch() {
        let bytes = ExtInfoBuilder::new().input_shapes(&[shape(&[1])]).build();
        assert!(ExtInfoHandler::parse("n", &bytes, 2, 0).is_err());
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = full_block();
        assert!(ExtInfoHandler::parse("n", &bytes[..bytes.len() - 1], 2, 1).is_err());
        assert!(ExtInfoHandler::parse("n", &bytes[..bytes.len() - 13], 2, 1).is_err());
        let mut trailing = bytes.clone();
        trailing.extend_from_slice(&[0, 0, 0]);
        assert!(ExtInfoHandler::parse("n", &trailing, 2, 1).is_err());
    }

    #[test]
    fn test_rank_limit() {
        assert!(ShapeAndType::new(0, &[1; 9]).is_none());
        let full = ShapeAndType::new(0, &[2; 8]).unwrap();
        assert_eq!(full.dims().len(), 8);
        let mut handler = ExtInfoHandler::parse("n", &full_block(), 2, 1).unwrap();
        assert!(handler.update_input_shape(0, &[1; 9]).is_err());
        assert!(handler.update_input_shape(2, &[1]).is_err());
    }
}
