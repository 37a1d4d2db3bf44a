use std::fmt;

/// Byte offset into the heap's [`crate::space::AddressSpace`].
///
/// Every "pointer" handed across the crate boundary is one of these. Offset `0`
/// is never a valid payload because the first block header lives there, so it
/// doubles as the null sentinel ([`Addr::NULL`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(u32);

impl Addr {
    pub const NULL: Addr = Addr(0);

    #[inline]
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `None` for the null sentinel, `Some(self)` otherwise.
    #[inline]
    pub const fn non_null(self) -> Option<Addr> {
        if self.is_null() { None } else { Some(self) }
    }

    #[inline]
    pub const fn add(self, bytes: u32) -> Addr {
        Addr(self.0 + bytes)
    }

    #[inline]
    pub const fn sub(self, bytes: u32) -> Addr {
        Addr(self.0 - bytes)
    }
}

impl From<Option<Addr>> for Addr {
    fn from(value: Option<Addr>) -> Self {
        value.unwrap_or(Addr::NULL)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
