//! Fixed layout (de)serialization for little-endian binary records.
//!
//! Structs derive [StructPack] and [StructUnpack] through `save_tool_macro`; fields are
//! read and written in declaration order.
use anyhow::Result;
use save_tool_macro::struct_unpack_impl_for_num;
use std::io::{Read, Seek, Write};

pub trait StructUnpack: Sized {
    fn unpack<R: Read + Seek>(reader: R) -> Result<Self>;
}

pub trait StructPack {
    fn pack<W: Write>(&self, writer: &mut W) -> Result<()>;
}

impl<T: StructPack> StructPack for Vec<T> {
    fn pack<W: Write>(&self, writer: &mut W) -> Result<()> {
        for item in self {
            item.pack(writer)?;
        }
        Ok(())
    }
}

struct_unpack_impl_for_num!(u8);
struct_unpack_impl_for_num!(u16);
struct_unpack_impl_for_num!(u32);
struct_unpack_impl_for_num!(u64);
struct_unpack_impl_for_num!(i8);
struct_unpack_impl_for_num!(i16);
struct_unpack_impl_for_num!(i32);
struct_unpack_impl_for_num!(i64);
struct_unpack_impl_for_num!(f32);
struct_unpack_impl_for_num!(f64);

impl StructUnpack for bool {
    fn unpack<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0] != 0)
    }
}

impl StructPack for bool {
    fn pack<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[if *self { 1 } else { 0 }])?;
        Ok(())
    }
}

/// Opaque fixed-size byte blocks.
impl<const N: usize> StructUnpack for [u8; N] {
    fn unpack<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; N];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<const N: usize> StructPack for [u8; N] {
    fn pack<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self)?;
        Ok(())
    }
}
