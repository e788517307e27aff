use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{ensure, Context, Result};

use crate::storage::page::{page_constants::PAGE_SIZE, PageId};

// Raw page I/O over a single database file. Pages live at fixed offsets of
// page_id * PAGE_SIZE; the disk scheduler is the only component expected to
// drive this from a background thread, behind its own mutex.
pub struct Manager {
    db_io: File,
    next_page_id: PageId,

    num_writes: u32,
    num_reads: u32,
}

impl Manager {
    pub fn open(path: &Path) -> Result<Self> {
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("failed to open db file {}", path.display()))?;

        Ok(Manager {
            db_io,
            next_page_id: 0,
            num_writes: 0,
            num_reads: 0,
        })
    }

    pub fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    pub fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> Result<()> {
        ensure!(
            page_data.len() == PAGE_SIZE,
            "page {} write buffer is {} bytes, expected {}",
            page_id,
            page_data.len(),
            PAGE_SIZE
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        self.db_io
            .write_all(page_data)
            .with_context(|| format!("I/O error while writing page {}", page_id))?;
        self.db_io
            .flush()
            .with_context(|| format!("error flushing page {}", page_id))?;

        self.num_writes += 1;
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> Result<()> {
        ensure!(
            page_data.len() == PAGE_SIZE,
            "page {} read buffer is {} bytes, expected {}",
            page_id,
            page_data.len(),
            PAGE_SIZE
        );

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let file_len = self
            .db_io
            .metadata()
            .context("failed to stat db file")?
            .len();

        // Pages past the end of the file were never written; they read back
        // as zeroes rather than as an error.
        if offset >= file_len {
            page_data.fill(0);
            self.num_reads += 1;
            return Ok(());
        }

        self.db_io
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("I/O error while seeking page {}", page_id))?;
        self.db_io
            .read_exact(page_data)
            .with_context(|| format!("I/O error while reading page {}", page_id))?;

        self.num_reads += 1;
        Ok(())
    }

    pub fn num_writes(&self) -> u32 {
        self.num_writes
    }

    pub fn num_reads(&self) -> u32 {
        self.num_reads
    }
}
