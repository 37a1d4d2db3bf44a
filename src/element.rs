use crate::addr::Addr;

/// A fixed-size plain value that containers can store as raw bytes.
///
/// The typed containers ([`crate::Array`], [`crate::List`], [`crate::Map`])
/// use [`Element::SIZE`] as the element size of the engine underneath and
/// copy values in and out with the two conversion functions. Values are
/// stored little-endian.
pub trait Element: Copy + 'static {
    const SIZE: usize;

    /// Writes `self` into `bytes`, which is exactly [`Element::SIZE`] long.
    fn write_to(self, bytes: &mut [u8]);

    /// Reads a value back from `bytes`, which is exactly [`Element::SIZE`] long.
    fn read_from(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_to(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_from(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl<const N: usize> Element for [u8; N] {
    const SIZE: usize = N;

    #[inline]
    fn write_to(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self);
    }

    #[inline]
    fn read_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(bytes);
        raw
    }
}

/// Lets containers hold offsets of other allocations. Releasing the
/// container does not release what they point to.
impl Element for Addr {
    const SIZE: usize = 4;

    #[inline]
    fn write_to(self, bytes: &mut [u8]) {
        self.get().write_to(bytes)
    }

    #[inline]
    fn read_from(bytes: &[u8]) -> Self {
        Addr::new(u32::read_from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Element + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = vec![0u8; T::SIZE];
        value.write_to(&mut buf);
        assert_eq!(T::read_from(&buf), value);
    }

    #[test]
    fn sizes_match_the_type() {
        assert_eq!(<u8 as Element>::SIZE, 1);
        assert_eq!(<i64 as Element>::SIZE, 8);
        assert_eq!(<[u8; 3] as Element>::SIZE, 3);
        assert_eq!(<Addr as Element>::SIZE, 4);
    }

    #[test]
    fn values_survive_the_byte_form() {
        round_trip(-5i16);
        round_trip(1.5f64);
        round_trip(*b"xyz");
        round_trip(Addr::new(0x1234));
    }

    #[test]
    fn layout_is_little_endian() {
        let mut buf = [0u8; 4];
        0x0A0B_0C0Du32.write_to(&mut buf);
        assert_eq!(buf, [0x0D, 0x0C, 0x0B, 0x0A]);
    }
}
