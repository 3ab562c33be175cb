//! Purpose: Encode the writable part of a setting as a compact JSON object.
//! Exports: `encode_setting`, `encoded_len`, `SliceWriter`.
//! Role: Builds request bodies into caller-owned (usually pooled) buffers.
//! Invariants: Output is `{"value":..,"content_type":..}` in that order, no whitespace.
//! Invariants: Writes never pass the end of the destination; overflow is a `Capacity` error
//! Invariants: and the partially written prefix is zeroed.
use crate::core::error::{Error, ErrorKind};
use crate::core::setting::ConfigurationSetting;
use serde::Serialize;
use std::io;

#[derive(Serialize)]
struct SettingBody<'a> {
    value: Option<&'a str>,
    content_type: Option<&'a str>,
}

impl<'a> SettingBody<'a> {
    fn of(setting: &'a ConfigurationSetting) -> Self {
        Self {
            value: setting.value.as_deref(),
            content_type: setting.content_type.as_deref(),
        }
    }
}

/// Bounded writer over a byte slice with an explicit write cursor.
#[derive(Debug)]
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    fn discard(&mut self) {
        self.buf[..self.written].fill(0);
        self.written = 0;
    }
}

impl io::Write for SliceWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.len() > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "destination buffer is full",
            ));
        }
        let end = self.written + data.len();
        self.buf[self.written..end].copy_from_slice(data);
        self.written = end;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingWriter {
    count: usize,
}

impl io::Write for CountingWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.count += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Number of bytes `encode_setting` needs for this setting.
pub fn encoded_len(setting: &ConfigurationSetting) -> Result<usize, Error> {
    let mut counter = CountingWriter::default();
    serde_json::to_writer(&mut counter, &SettingBody::of(setting)).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode setting")
            .with_source(err)
    })?;
    Ok(counter.count)
}

/// Writes the setting body into `dst` and returns the number of bytes written.
pub fn encode_setting(setting: &ConfigurationSetting, dst: &mut [u8]) -> Result<usize, Error> {
    let available = dst.len();
    let mut writer = SliceWriter::new(dst);
    match serde_json::to_writer(&mut writer, &SettingBody::of(setting)) {
        Ok(()) => Ok(writer.written()),
        Err(err) if err.is_io() => {
            writer.discard();
            let required = encoded_len(setting)?;
            Err(Error::new(ErrorKind::Capacity)
                .with_message(format!(
                    "setting needs {required} bytes but the buffer holds {available}"
                ))
                .with_source(err))
        }
        Err(err) => Err(Error::new(ErrorKind::Internal)
            .with_message("failed to encode setting")
            .with_source(err)),
    }
}
