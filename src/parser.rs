// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Parsing of binary resources data. */

use {
    crate::{
        resource::{Resource, Value},
        serialization::{
            read_seven_bit_encoded, resource_name_hash, TypeCode, MAGIC_NUMBER,
            RESOURCE_MANAGER_HEADER_VERSION, RUNTIME_RESOURCE_SET_VERSION, USER_TYPE_START,
        },
        Error, Result,
    },
    byteorder::{LittleEndian, ReadBytesExt},
    std::{borrow::Cow, io::Cursor},
};

/// Read a length-prefixed UTF-8 string, borrowing from the input.
fn read_utf8_str<'a>(reader: &mut Cursor<&'a [u8]>) -> Result<&'a str> {
    let length = read_seven_bit_encoded(reader)? as usize;
    let data: &'a [u8] = *reader.get_ref();
    let start = reader.position() as usize;

    let end = start
        .checked_add(length)
        .filter(|end| *end <= data.len())
        .ok_or(Error::Malformed("string extends past end of data"))?;

    reader.set_position(end as u64);

    std::str::from_utf8(&data[start..end]).map_err(|_| Error::StringDecode)
}

/// Read a length-prefixed UTF-16LE string.
fn read_utf16_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    let byte_length = read_seven_bit_encoded(reader)? as usize;

    if byte_length % 2 != 0 {
        return Err(Error::Malformed("resource name has odd byte length"));
    }

    let data = *reader.get_ref();
    let start = reader.position() as usize;

    let end = start
        .checked_add(byte_length)
        .filter(|end| *end <= data.len())
        .ok_or(Error::Malformed("resource name extends past end of data"))?;

    reader.set_position(end as u64);

    let units = data[start..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();

    String::from_utf16(&units).map_err(|_| Error::StringDecode)
}

/// A reader over binary resources data.
///
/// The container is validated eagerly up to its index tables; entry
/// names and values are decoded lazily. Values borrow from the input
/// buffer where their encoding permits.
///
/// Lookup by name via [Self::find] uses the container's sorted hash
/// table, which is the reason the format carries one. Iteration via
/// [Self::iter] walks entries in stored order.
pub struct ResourceReader<'a> {
    data: &'a [u8],

    /// Declared non-primitive type names, in declaration order.
    type_names: Vec<&'a str>,

    resources_count: usize,
    hash_table_offset: usize,
    position_table_offset: usize,
    name_section_offset: usize,
    data_section_offset: usize,
}

impl<'a> ResourceReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);

        let magic = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading magic number"))?;

        if magic != MAGIC_NUMBER {
            return Err(Error::BadMagic);
        }

        let header_version = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading header version"))?;

        if header_version != RESOURCE_MANAGER_HEADER_VERSION {
            return Err(Error::UnsupportedVersion(header_version));
        }

        // The header holds the reader and resource set identity strings.
        // Its advertised length lets us skip it wholesale.
        let header_length = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading header length"))?;

        let header_end = (reader.position() as usize)
            .checked_add(header_length as usize)
            .filter(|end| *end <= data.len())
            .ok_or(Error::Malformed("header extends past end of data"))?;

        reader.set_position(header_end as u64);

        let set_version = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading resource set version"))?;

        if set_version != RUNTIME_RESOURCE_SET_VERSION {
            return Err(Error::UnsupportedVersion(set_version));
        }

        let resources_count = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading resource count"))?
            as usize;

        let type_count = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading declared type count"))?
            as usize;

        let mut type_names = Vec::with_capacity(type_count);

        for _ in 0..type_count {
            type_names.push(read_utf8_str(&mut reader)?);
        }

        // Skip alignment padding so the hash table starts on an 8 byte
        // boundary.
        let misalignment = (reader.position() as usize) & 7;
        if misalignment != 0 {
            reader.set_position(reader.position() + (8 - misalignment) as u64);
        }

        let hash_table_offset = reader.position() as usize;

        let table_length = resources_count
            .checked_mul(4)
            .ok_or(Error::Malformed("index tables exceed data"))?;

        let position_table_offset = hash_table_offset
            .checked_add(table_length)
            .ok_or(Error::Malformed("index tables exceed data"))?;

        let data_section_field_offset = position_table_offset
            .checked_add(table_length)
            .filter(|offset| offset + 4 <= data.len())
            .ok_or(Error::Malformed("index tables exceed data"))?;

        reader.set_position(data_section_field_offset as u64);

        let data_section_offset = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading data section offset"))?
            as usize;

        let name_section_offset = data_section_field_offset + 4;

        if data_section_offset < name_section_offset || data_section_offset > data.len() {
            return Err(Error::Malformed("data section offset out of range"));
        }

        Ok(Self {
            data,
            type_names,
            resources_count,
            hash_table_offset,
            position_table_offset,
            name_section_offset,
            data_section_offset,
        })
    }

    /// Number of resources stored in the container.
    pub fn resource_count(&self) -> usize {
        self.resources_count
    }

    /// The declared non-primitive type names, in declaration order.
    pub fn type_names(&self) -> &[&'a str] {
        &self.type_names
    }

    /// Iterate all entries, in stored order.
    pub fn iter(&self) -> ResourceIterator<'_, 'a> {
        ResourceIterator {
            reader: self,
            position: self.name_section_offset,
            remaining: self.resources_count,
        }
    }

    /// Look up a resource's value by name.
    ///
    /// Binary searches the hash table, then probes colliding entries
    /// with an exact name comparison. `None` when no entry matches.
    pub fn find(&self, name: &str) -> Result<Option<Value<'a>>> {
        let target = resource_name_hash(name);

        // Find the leftmost table slot holding the target hash.
        let mut lo = 0;
        let mut hi = self.resources_count;

        while lo < hi {
            let mid = (lo + hi) / 2;

            if self.table_entry(self.hash_table_offset, mid)? < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let mut slot = lo;

        while slot < self.resources_count
            && self.table_entry(self.hash_table_offset, slot)? == target
        {
            let position = self.table_entry(self.position_table_offset, slot)? as usize;

            let entry_offset = self
                .name_section_offset
                .checked_add(position)
                .filter(|offset| *offset < self.data_section_offset)
                .ok_or(Error::Malformed("name position out of range"))?;

            let mut cursor = Cursor::new(self.data);
            cursor.set_position(entry_offset as u64);

            let candidate = read_utf16_string(&mut cursor)?;

            if candidate == name {
                let data_offset = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading value offset"))?
                    as usize;

                return self.read_value(data_offset).map(Some);
            }

            slot += 1;
        }

        Ok(None)
    }

    /// Read one `u32` from an index table.
    fn table_entry(&self, table_offset: usize, index: usize) -> Result<u32> {
        let offset = table_offset + index * 4;

        let mut slice = self
            .data
            .get(offset..)
            .ok_or(Error::Malformed("index table extends past end of data"))?;

        slice
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("index table extends past end of data"))
    }

    /// Decode the value stored at `data_offset` (relative to the data
    /// section).
    fn read_value(&self, data_offset: usize) -> Result<Value<'a>> {
        let absolute = self
            .data_section_offset
            .checked_add(data_offset)
            .filter(|offset| *offset < self.data.len())
            .ok_or(Error::Malformed("value offset out of range"))?;

        let mut reader = Cursor::new(self.data);
        reader.set_position(absolute as u64);

        let discriminator = read_seven_bit_encoded(&mut reader)?;

        if discriminator >= USER_TYPE_START {
            let index = (discriminator - USER_TYPE_START) as usize;

            let type_name = self
                .type_names
                .get(index)
                .copied()
                .ok_or(Error::Malformed(
                    "type discriminator references an undeclared type name",
                ))?;

            let start = reader.position() as usize;
            let end = self.opaque_value_end(data_offset)?;

            if end < start {
                return Err(Error::Malformed("opaque value payload extent is negative"));
            }

            return Ok(Value::Opaque {
                type_name: Cow::Borrowed(type_name),
                data: Cow::Borrowed(&self.data[start..end]),
            });
        }

        let code = TypeCode::try_from(discriminator)
            .map_err(|_| Error::InvalidTypeCode(discriminator))?;

        let value = match code {
            TypeCode::Null => Value::Null,
            TypeCode::String => Value::String(Cow::Borrowed(read_utf8_str(&mut reader)?)),
            TypeCode::Boolean => Value::Boolean(
                reader
                    .read_u8()
                    .map_err(|_| Error::Malformed("failed reading boolean value"))?
                    != 0,
            ),
            TypeCode::Char => {
                let unit = reader
                    .read_u16::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading char value"))?;

                Value::Char(char::from_u32(u32::from(unit)).ok_or(Error::StringDecode)?)
            }
            TypeCode::Byte => Value::Byte(
                reader
                    .read_u8()
                    .map_err(|_| Error::Malformed("failed reading byte value"))?,
            ),
            TypeCode::SByte => Value::SByte(
                reader
                    .read_i8()
                    .map_err(|_| Error::Malformed("failed reading sbyte value"))?,
            ),
            TypeCode::Int16 => Value::Int16(
                reader
                    .read_i16::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading int16 value"))?,
            ),
            TypeCode::UInt16 => Value::UInt16(
                reader
                    .read_u16::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading uint16 value"))?,
            ),
            TypeCode::Int32 => Value::Int32(
                reader
                    .read_i32::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading int32 value"))?,
            ),
            TypeCode::UInt32 => Value::UInt32(
                reader
                    .read_u32::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading uint32 value"))?,
            ),
            TypeCode::Int64 => Value::Int64(
                reader
                    .read_i64::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading int64 value"))?,
            ),
            TypeCode::UInt64 => Value::UInt64(
                reader
                    .read_u64::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading uint64 value"))?,
            ),
            TypeCode::Single => Value::Single(
                reader
                    .read_f32::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading single value"))?,
            ),
            TypeCode::Double => Value::Double(
                reader
                    .read_f64::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading double value"))?,
            ),
            TypeCode::ByteArray => {
                let length = reader
                    .read_u32::<LittleEndian>()
                    .map_err(|_| Error::Malformed("failed reading byte array length"))?
                    as usize;

                let start = reader.position() as usize;

                let end = start
                    .checked_add(length)
                    .filter(|end| *end <= self.data.len())
                    .ok_or(Error::Malformed("byte array extends past end of data"))?;

                Value::ByteArray(Cow::Borrowed(&self.data[start..end]))
            }
        };

        Ok(value)
    }

    /// Compute where an opaque value's payload ends.
    ///
    /// Opaque payloads carry no length; their extent runs to the next
    /// entry's value or the end of the container.
    fn opaque_value_end(&self, data_offset: usize) -> Result<usize> {
        let mut end = self.data.len();

        for index in 0..self.resources_count {
            let position = self.table_entry(self.position_table_offset, index)? as usize;

            let mut cursor = Cursor::new(self.data);
            cursor.set_position((self.name_section_offset + position) as u64);

            let name_length = read_seven_bit_encoded(&mut cursor)? as u64;
            cursor.set_position(cursor.position() + name_length);

            let other = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| Error::Malformed("failed reading value offset"))?
                as usize;

            if other > data_offset {
                end = end.min(self.data_section_offset + other);
            }
        }

        Ok(end)
    }
}

/// An iterator over the entries of a parsed container.
///
/// Emits entries in stored order. Names are owned (the wire encoding is
/// UTF-16, so borrowing is not possible); values borrow from the input
/// where their encoding permits.
pub struct ResourceIterator<'r, 'a> {
    reader: &'r ResourceReader<'a>,
    position: usize,
    remaining: usize,
}

impl<'r, 'a> ResourceIterator<'r, 'a> {
    fn parse_next(&mut self) -> Result<Resource<'a>> {
        let mut cursor = Cursor::new(self.reader.data);
        cursor.set_position(self.position as u64);

        let name = read_utf16_string(&mut cursor)?;

        let data_offset = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Malformed("failed reading value offset"))?
            as usize;

        self.position = cursor.position() as usize;

        let value = self.reader.read_value(data_offset)?;

        Ok(Resource {
            name: Cow::Owned(name),
            value,
        })
    }
}

impl<'r, 'a> Iterator for ResourceIterator<'r, 'a> {
    type Item = Result<Resource<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;

        Some(self.parse_next())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::writer::{write_resources, ResourceWriter},
        anyhow::Result,
        byteorder::WriteBytesExt,
    };

    #[test]
    fn test_too_short() {
        let res = ResourceReader::new(b"foo");
        assert!(matches!(res.err(), Some(Error::Malformed(_))));
    }

    #[test]
    fn test_bad_magic() {
        let res = ResourceReader::new(b"\x00\x00\x00\x00\x01\x00\x00\x00");
        assert!(matches!(res.err(), Some(Error::BadMagic)));
    }

    #[test]
    fn test_unsupported_header_version() -> Result<()> {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(MAGIC_NUMBER)?;
        data.write_u32::<LittleEndian>(2)?;
        data.write_u32::<LittleEndian>(0)?;

        let res = ResourceReader::new(&data);
        assert!(matches!(res.err(), Some(Error::UnsupportedVersion(2))));

        Ok(())
    }

    #[test]
    fn test_empty_container() -> Result<()> {
        let mut data = Vec::new();
        write_resources(&[], &mut data)?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(reader.resource_count(), 0);
        assert!(reader.type_names().is_empty());
        assert_eq!(reader.iter().count(), 0);
        assert_eq!(reader.find("anything")?, None);

        Ok(())
    }

    #[test]
    fn test_round_trip_strings() -> Result<()> {
        let mut data = Vec::new();
        let mut writer = ResourceWriter::new(&mut data);

        writer.add_resource("name1", "value1")?;
        writer.add_resource("name2", "value2")?;
        writer.add_resource("name3", "value3")?;
        writer.generate()?;
        writer.close()?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(reader.resource_count(), 3);

        for (name, expected) in [
            ("name1", "value1"),
            ("name2", "value2"),
            ("name3", "value3"),
        ] {
            assert_eq!(
                reader.find(name)?,
                Some(Value::String(Cow::Borrowed(expected)))
            );
        }

        assert_eq!(reader.find("name4")?, None);

        let entries = reader.iter().collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            entries
                .iter()
                .map(|entry| entry.name.as_ref())
                .collect::<Vec<_>>(),
            vec!["name1", "name2", "name3"]
        );

        Ok(())
    }

    #[test]
    fn test_round_trip_all_kinds() -> Result<()> {
        let payload = vec![0xdeu8, 0xad, 0xbe, 0xef];

        let resources = vec![
            Resource::new("null", Value::Null),
            Resource::new("string", "text"),
            Resource::new("boolean", true),
            Resource::new("char", 'Ā'),
            Resource::new("byte", Value::Byte(0xff)),
            Resource::new("sbyte", Value::SByte(-12)),
            Resource::new("int16", Value::Int16(-1234)),
            Resource::new("uint16", Value::UInt16(65535)),
            Resource::new("int32", -123_456_789i32),
            Resource::new("uint32", Value::UInt32(3_000_000_000)),
            Resource::new("int64", -1_234_567_890_123i64),
            Resource::new("uint64", Value::UInt64(u64::MAX)),
            Resource::new("single", Value::Single(1.5)),
            Resource::new("double", 2.25f64),
            Resource::new("bytes", payload.clone()),
            Resource::new(
                "opaque",
                Value::Opaque {
                    type_name: Cow::Borrowed("My.Type, MyAssembly"),
                    data: Cow::Borrowed(&[9, 8, 7]),
                },
            ),
        ];

        let mut data = Vec::new();
        write_resources(&resources, &mut data)?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(reader.resource_count(), resources.len());
        assert_eq!(reader.type_names(), ["My.Type, MyAssembly"]);

        for resource in &resources {
            let found = reader
                .find(&resource.name)?
                .unwrap_or_else(|| panic!("missing entry {}", resource.name));
            assert_eq!(found, resource.value, "entry {}", resource.name);
        }

        Ok(())
    }

    #[test]
    fn test_opaque_extent_is_bounded_by_next_entry() -> Result<()> {
        // The opaque payload carries no length, so its extent must stop
        // at the next entry's value rather than the end of the data.
        let resources = vec![
            Resource::new(
                "aa",
                Value::Opaque {
                    type_name: Cow::Borrowed("T"),
                    data: Cow::Borrowed(&[1, 2, 3]),
                },
            ),
            Resource::new("zz", Value::Byte(0x55)),
        ];

        let mut data = Vec::new();
        write_resources(&resources, &mut data)?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(
            reader.find("aa")?,
            Some(Value::Opaque {
                type_name: Cow::Borrowed("T"),
                data: Cow::Borrowed(&[1, 2, 3]),
            })
        );

        Ok(())
    }

    #[test]
    fn test_collision_lookup() -> Result<()> {
        // "bC" and "cb" share a hash. Lookup must probe past the first
        // colliding slot and also reject a colliding name that is not
        // actually present.
        let mut data = Vec::new();
        write_resources(
            &[Resource::new("bC", "first"), Resource::new("cb", "second")],
            &mut data,
        )?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(
            reader.find("bC")?,
            Some(Value::String(Cow::Borrowed("first")))
        );
        assert_eq!(
            reader.find("cb")?,
            Some(Value::String(Cow::Borrowed("second")))
        );

        let mut data = Vec::new();
        write_resources(&[Resource::new("bC", "only")], &mut data)?;

        let reader = ResourceReader::new(&data)?;
        assert_eq!(reader.find("cb")?, None);

        Ok(())
    }

    #[test]
    fn test_round_trip_idempotence() -> Result<()> {
        let resources = vec![
            Resource::new("gamma", "3"),
            Resource::new("alpha", "1"),
            Resource::new("beta", Value::Int32(2)),
            Resource::new(
                "delta",
                Value::Opaque {
                    type_name: Cow::Borrowed("T"),
                    data: Cow::Borrowed(&[4]),
                },
            ),
        ];

        let mut first = Vec::new();
        write_resources(&resources, &mut first)?;

        let reader = ResourceReader::new(&first)?;
        let decoded = reader.iter().collect::<Result<Vec<_>, _>>()?;

        let mut second = Vec::new();
        write_resources(&decoded, &mut second)?;

        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn test_truncated_value() -> Result<()> {
        let mut data = Vec::new();
        write_resources(&[Resource::new("name", "value")], &mut data)?;

        // Drop the tail of the data section.
        let truncated = &data[..data.len() - 3];

        let reader = ResourceReader::new(truncated)?;
        assert!(reader.find("name").is_err());

        Ok(())
    }
}
