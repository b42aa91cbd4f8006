//! Userspace interrupt delivery through UIO
//!
//! A UIO device node reports each interrupt as a 4-byte event counter on
//! `read()`, and re-enables the line when `1u32` is written back. The line
//! stays masked between the read and the re-enable, so the dispatcher runs
//! with the interrupt held off exactly like a kernel handler.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::fcntl::OFlag;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

use crate::error::{OtgError, Result};

/// Something that blocks until the controller interrupt fires
#[async_trait]
pub trait IrqSource: Send {
    /// Wait for the next interrupt; returns the source's event counter
    async fn wait(&mut self) -> Result<u32>;

    /// The interrupt has been serviced and may fire again
    fn complete(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct UioIrq {
    fd: AsyncFd<File>,
    path: PathBuf,
    last_count: Option<u32>,
}

impl UioIrq {
    /// Open a UIO node (e.g. `/dev/uio0`) and unmask its interrupt
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .map_err(|e| OtgError::Init(format!("Failed to open {}: {}", path.display(), e)))?;
        let fd = AsyncFd::new(file)?;

        let mut irq = Self {
            fd,
            path,
            last_count: None,
        };
        irq.unmask()?;
        info!("Waiting for interrupts on {}", irq.path.display());
        Ok(irq)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unmask(&mut self) -> Result<()> {
        let mut file: &File = self.fd.get_ref();
        file.write_all(&1u32.to_ne_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl IrqSource for UioIrq {
    async fn wait(&mut self) -> Result<u32> {
        loop {
            let mut guard = self.fd.readable().await?;
            let mut buf = [0u8; 4];
            let read = guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(&mut buf)
            });

            match read {
                Ok(Ok(4)) => {
                    let count = u32::from_ne_bytes(buf);
                    if let Some(last) = self.last_count {
                        let missed = count.wrapping_sub(last).saturating_sub(1);
                        if missed > 0 {
                            debug!("{} interrupts coalesced on {}", missed, self.path.display());
                        }
                    }
                    self.last_count = Some(count);
                    return Ok(count);
                }
                Ok(Ok(n)) => {
                    return Err(OtgError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("short read of {} bytes from {}", n, self.path.display()),
                    )));
                }
                Ok(Err(e)) => return Err(e.into()),
                // spurious readiness
                Err(_would_block) => continue,
            }
        }
    }

    fn complete(&mut self) -> Result<()> {
        self.unmask().map_err(|e| {
            warn!("Failed to re-enable interrupt on {}: {}", self.path.display(), e);
            e
        })
    }
}
