use anyhow::{Result, anyhow};
use nom::{
    IResult,
    bytes::complete::{tag, take},
    error::{Error, ErrorKind},
    number::complete::{be_u8, be_u16},
};

pub const CLASS_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

pub fn is_class_file(bytes: &[u8]) -> bool {
    bytes.starts_with(&CLASS_MAGIC)
}

enum Constant<'a> {
    Utf8(&'a [u8]),
    Other { slots: u16 },
}

fn header(input: &[u8]) -> IResult<&[u8], u16> {
    let (input, _) = tag(&CLASS_MAGIC[..])(input)?;
    let (input, _minor_version) = be_u16(input)?;
    let (input, _major_version) = be_u16(input)?;
    be_u16(input)
}

fn skip(input: &[u8], len: usize, slots: u16) -> IResult<&[u8], Constant<'_>> {
    let (input, _) = take(len)(input)?;
    Ok((input, Constant::Other { slots }))
}

fn constant(input: &[u8]) -> IResult<&[u8], Constant<'_>> {
    let (input, tag) = be_u8(input)?;
    match tag {
        1 => {
            let (input, length) = be_u16(input)?;
            let (input, bytes) = take(length as usize)(input)?;
            Ok((input, Constant::Utf8(bytes)))
        }
        // Integer, Float
        3 | 4 => skip(input, 4, 1),
        // Long and Double occupy two pool slots
        5 | 6 => skip(input, 8, 2),
        // Class, String, MethodType, Module, Package
        7 | 8 | 16 | 19 | 20 => skip(input, 2, 1),
        // Field/Method/InterfaceMethod refs, NameAndType, Dynamic, InvokeDynamic
        9 | 10 | 11 | 12 | 17 | 18 => skip(input, 4, 1),
        // MethodHandle
        15 => skip(input, 3, 1),
        _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::Switch))),
    }
}

fn constant_pool(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    let (mut input, count) = header(input)?;
    let mut utf8 = Vec::new();
    let mut index = 1u16;
    while index < count {
        let (rest, entry) = constant(input)?;
        input = rest;
        match entry {
            Constant::Utf8(bytes) => {
                utf8.push(bytes);
                index += 1;
            }
            Constant::Other { slots } => index = index.saturating_add(slots),
        }
    }
    Ok((input, utf8))
}

/// Every UTF-8 entry of the constant pool, in pool order.
pub fn utf8_constants(bytes: &[u8]) -> Result<Vec<String>> {
    let (_, entries) = constant_pool(bytes).map_err(|err| anyhow!("malformed class file: {}", describe(err)))?;
    Ok(entries
        .into_iter()
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
        .collect())
}

/// Whether the constant pool mentions a type descriptor such as `Lkotlin/Metadata;`.
pub fn references_descriptor(bytes: &[u8], descriptor: &str) -> Result<bool> {
    let (_, entries) = constant_pool(bytes).map_err(|err| anyhow!("malformed class file: {}", describe(err)))?;
    Ok(entries.iter().any(|entry| *entry == descriptor.as_bytes()))
}

fn describe(err: nom::Err<Error<&[u8]>>) -> String {
    match err {
        nom::Err::Incomplete(_) => "truncated input".to_string(),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            format!("{:?} with {} bytes left", e.code, e.input.len())
        }
    }
}
