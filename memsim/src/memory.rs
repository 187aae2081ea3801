use std::{collections::HashMap, fmt};

#[cfg(feature = "stat")]
use std::cell::RefCell;

use thiserror::Error;

use crate::config::MemoryConfig;

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// width of every access in bytes
pub const WORD_BYTES: u32 = 4;

#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(u32);

impl Addr {
    pub const fn new(v: u32) -> Self {
        Self(v)
    }
    pub fn inner(self) -> u32 {
        self.0
    }
    pub fn disp(self, amount: u32) -> Self {
        Self(self.0.wrapping_add(amount))
    }
    /// start of the `size`-byte block containing this address
    pub fn align_down(self, size: u32) -> Self {
        Self(self.0 - self.0 % size)
    }
}

impl From<u32> for Addr {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Page,
    Line,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Page => write!(f, "page"),
            Boundary::Line => write!(f, "cache line"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessError {
    #[error("address {addr} out of range for memory of {capacity:#x} bytes")]
    OutOfRange { addr: Addr, capacity: u64 },
    #[error("word at {addr} crosses its {boundary} boundary (offset {offset} + 4 > {size})")]
    AlignmentFault {
        addr: Addr,
        boundary: Boundary,
        offset: u32,
        size: u32,
    },
}

pub type Result<T> = std::result::Result<T, MemoryAccessError>;

/// Word-granular storage consulted by the cache on a miss and on every write.
pub trait WordStorage {
    /// total number of addressable bytes
    fn capacity(&self) -> u64;
    /// validates a word access at `addr` without touching any data.
    fn check(&self, addr: Addr) -> Result<()>;
    fn read_word(&self, addr: Addr) -> Result<u32>;
    fn write_word(&mut self, addr: Addr, val: u32) -> Result<()>;
    /// fills `buf` with the consecutive words starting at `base`.
    fn read_block(&self, base: Addr, buf: &mut [u8]) -> Result<()> {
        for (i, chunk) in buf.chunks_exact_mut(WORD_BYTES as usize).enumerate() {
            let val = self.read_word(base.disp(i as u32 * WORD_BYTES))?;
            chunk.copy_from_slice(&val.to_le_bytes());
        }
        Ok(())
    }
}

/// Paged backing store. Pages are materialized on first write; a page that was
/// never written reads as zeros.
pub struct PagedMemory {
    page_size: u32,
    page_count: u32,
    pages: HashMap<u32, Box<[u8]>>,
    #[cfg(feature = "stat")]
    stat_mem: RefCell<stat::MemoryStat>,
}

impl PagedMemory {
    pub fn new(config: &MemoryConfig) -> Self {
        log::info!(
            "memory: {} pages of {} bytes ({:#x} bytes addressable)",
            config.page_count,
            config.page_size,
            config.capacity()
        );
        Self {
            page_size: config.page_size,
            page_count: config.page_count,
            pages: HashMap::new(),
            #[cfg(feature = "stat")]
            stat_mem: RefCell::default(),
        }
    }
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
    pub fn page_count(&self) -> u32 {
        self.page_count
    }
    /// number of pages that have been written at least once
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }
    /// splits `addr` into (page, offset) after range and boundary checks.
    fn locate(&self, addr: Addr) -> Result<(u32, usize)> {
        let page = addr.inner() / self.page_size;
        if page >= self.page_count {
            return Err(MemoryAccessError::OutOfRange {
                addr,
                capacity: self.capacity(),
            });
        }
        let offset = addr.inner() % self.page_size;
        if offset + WORD_BYTES > self.page_size {
            return Err(MemoryAccessError::AlignmentFault {
                addr,
                boundary: Boundary::Page,
                offset,
                size: self.page_size,
            });
        }
        Ok((page, offset as usize))
    }
    #[inline]
    fn get_raw(&self, page: u32, offset: usize) -> u32 {
        let mut v: [u8; 4] = [0; 4];
        if let Some(bytes) = self.pages.get(&page) {
            v.copy_from_slice(&bytes[offset..(4 + offset)]);
        }
        u32::from_le_bytes(v)
    }
}

impl WordStorage for PagedMemory {
    fn capacity(&self) -> u64 {
        self.page_size as u64 * self.page_count as u64
    }
    fn check(&self, addr: Addr) -> Result<()> {
        self.locate(addr).map(|_| ())
    }
    fn read_word(&self, addr: Addr) -> Result<u32> {
        let (page, offset) = self.locate(addr)?;
        #[cfg(feature = "stat")]
        self.stat_mem.borrow_mut().on_read();
        Ok(self.get_raw(page, offset))
    }
    fn write_word(&mut self, addr: Addr, val: u32) -> Result<()> {
        let (page, offset) = self.locate(addr)?;
        #[cfg(feature = "stat")]
        self.stat_mem.borrow_mut().on_write();
        let page_size = self.page_size as usize;
        let bytes = self
            .pages
            .entry(page)
            .or_insert_with(|| vec![0; page_size].into_boxed_slice());
        bytes[offset..(4 + offset)].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
}

#[cfg(feature = "stat")]
impl AddStats for PagedMemory {
    fn add_stats(&self, buf: &mut Stats) {
        let mut stat = self.stat_mem.borrow().to_owned();
        stat.resident_pages = self.pages.len();
        buf.push(Box::new(stat));
    }
}

#[cfg(feature = "stat")]
mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Clone, Copy, Default)]
    pub struct MemoryStat {
        read: usize,
        write: usize,
        pub resident_pages: usize,
    }

    impl MemoryStat {
        pub fn on_read(&mut self) {
            self.read += 1;
        }
        pub fn on_write(&mut self) {
            self.write += 1;
        }
    }

    impl Stat for MemoryStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ MemoryStat {
        fn header(&self) -> &'static str {
            "backing store (word accesses)"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ MemoryStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "           read: {:>10}", self.read)?;
            writeln!(f, "          write: {:>10}", self.write)?;
            writeln!(f, "  resident pages: {:>9}", self.resident_pages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> PagedMemory {
        PagedMemory::new(&MemoryConfig {
            page_size: 64,
            page_count: 4,
        })
    }

    #[test]
    fn test_memory() {
        let mut m = small();
        assert_eq!((64, 4), (m.page_size(), m.page_count()));
        m.write_word(Addr::new(0), 0xDEADBEEF).unwrap();
        assert_eq!(0xDEADBEEF, m.read_word(Addr::new(0)).unwrap());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut m = small();
        m.write_word(Addr::new(8), 0x12345678).unwrap();
        // the low byte lands at the lowest address
        assert_eq!(0x00000078, m.read_word(Addr::new(8)).unwrap() & 0xff);
        assert_eq!(0x00123456, m.read_word(Addr::new(9)).unwrap());
    }

    #[test]
    fn test_untouched_reads_zero() {
        let m = small();
        assert_eq!(0, m.read_word(Addr::new(0x80)).unwrap());
        assert_eq!(0, m.resident_pages());
    }

    #[test]
    fn test_out_of_range() {
        let mut m = small();
        let addr = Addr::new(4 * 64);
        assert_eq!(
            Err(MemoryAccessError::OutOfRange {
                addr,
                capacity: 256
            }),
            m.read_word(addr)
        );
        assert!(m.write_word(addr, 1).is_err());
        assert_eq!(0, m.resident_pages());
    }

    #[test]
    fn test_page_crossing_rejected() {
        let mut m = small();
        let addr = Addr::new(62);
        let err = m.write_word(addr, 0xffffffff).unwrap_err();
        assert_eq!(
            MemoryAccessError::AlignmentFault {
                addr,
                boundary: Boundary::Page,
                offset: 62,
                size: 64
            },
            err
        );
        assert_eq!(0, m.read_word(Addr::new(60)).unwrap());
        assert_eq!(0, m.read_word(Addr::new(64)).unwrap());
        // last whole word of the page is fine
        m.write_word(Addr::new(60), 7).unwrap();
        assert_eq!(7, m.read_word(Addr::new(60)).unwrap());
    }

    #[test]
    fn test_read_block() {
        let mut m = small();
        m.write_word(Addr::new(64), 0x04030201).unwrap();
        m.write_word(Addr::new(68), 0x08070605).unwrap();
        let mut buf = [0u8; 8];
        m.read_block(Addr::new(64), &mut buf).unwrap();
        assert_eq!([1, 2, 3, 4, 5, 6, 7, 8], buf);
    }

    #[test]
    fn test_default_space_is_4gib() {
        let mut m = PagedMemory::new(&MemoryConfig::default());
        assert_eq!((4096, 1 << 20), (m.page_size(), m.page_count()));
        assert_eq!(1u64 << 32, m.capacity());
        let top = Addr::new(u32::MAX - 3);
        m.write_word(top, 0xcafebabe).unwrap();
        assert_eq!(0xcafebabe, m.read_word(top).unwrap());
        assert_eq!(1, m.resident_pages());
    }
}
