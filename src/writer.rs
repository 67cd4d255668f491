// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Writing binary resources data.
*/

use {
    crate::{
        resource::{Resource, Value},
        serialization::{
            resource_name_hash, write_alignment_padding, write_seven_bit_encoded,
            write_utf16_string, write_utf8_string, TypeCode, MAGIC_NUMBER,
            RESOURCE_MANAGER_HEADER_VERSION, RESOURCE_READER_TYPE_NAME, RESOURCE_SET_TYPE_NAME,
            RUNTIME_RESOURCE_SET_VERSION, USER_TYPE_START,
        },
        Error, Result,
    },
    byteorder::{LittleEndian, WriteBytesExt},
    std::{collections::BTreeMap, io::Write},
};

/// Encode a single value into the data section.
///
/// Opaque values allocate a slot in `type_names` on first use of their
/// type name; the emitted discriminator references that slot.
fn write_value<'v>(
    dest: &mut Vec<u8>,
    value: &'v Value<'_>,
    type_names: &mut Vec<&'v str>,
) -> Result<()> {
    match value {
        Value::Null => {
            write_seven_bit_encoded(dest, TypeCode::Null.into())?;
        }
        Value::String(value) => {
            write_seven_bit_encoded(dest, TypeCode::String.into())?;
            write_utf8_string(dest, value)?;
        }
        Value::Boolean(value) => {
            write_seven_bit_encoded(dest, TypeCode::Boolean.into())?;
            dest.write_u8(u8::from(*value))?;
        }
        Value::Char(value) => {
            let mut units = [0u16; 2];
            let encoded = value.encode_utf16(&mut units);

            if encoded.len() != 1 {
                return Err(Error::UnrepresentableChar(*value));
            }

            write_seven_bit_encoded(dest, TypeCode::Char.into())?;
            dest.write_u16::<LittleEndian>(encoded[0])?;
        }
        Value::Byte(value) => {
            write_seven_bit_encoded(dest, TypeCode::Byte.into())?;
            dest.write_u8(*value)?;
        }
        Value::SByte(value) => {
            write_seven_bit_encoded(dest, TypeCode::SByte.into())?;
            dest.write_i8(*value)?;
        }
        Value::Int16(value) => {
            write_seven_bit_encoded(dest, TypeCode::Int16.into())?;
            dest.write_i16::<LittleEndian>(*value)?;
        }
        Value::UInt16(value) => {
            write_seven_bit_encoded(dest, TypeCode::UInt16.into())?;
            dest.write_u16::<LittleEndian>(*value)?;
        }
        Value::Int32(value) => {
            write_seven_bit_encoded(dest, TypeCode::Int32.into())?;
            dest.write_i32::<LittleEndian>(*value)?;
        }
        Value::UInt32(value) => {
            write_seven_bit_encoded(dest, TypeCode::UInt32.into())?;
            dest.write_u32::<LittleEndian>(*value)?;
        }
        Value::Int64(value) => {
            write_seven_bit_encoded(dest, TypeCode::Int64.into())?;
            dest.write_i64::<LittleEndian>(*value)?;
        }
        Value::UInt64(value) => {
            write_seven_bit_encoded(dest, TypeCode::UInt64.into())?;
            dest.write_u64::<LittleEndian>(*value)?;
        }
        Value::Single(value) => {
            write_seven_bit_encoded(dest, TypeCode::Single.into())?;
            dest.write_f32::<LittleEndian>(*value)?;
        }
        Value::Double(value) => {
            write_seven_bit_encoded(dest, TypeCode::Double.into())?;
            dest.write_f64::<LittleEndian>(*value)?;
        }
        Value::ByteArray(data) => {
            let length =
                u32::try_from(data.len()).map_err(|_| Error::Oversized("byte array value"))?;

            write_seven_bit_encoded(dest, TypeCode::ByteArray.into())?;
            dest.write_u32::<LittleEndian>(length)?;
            dest.write_all(data)?;
        }
        Value::Opaque { type_name, data } => {
            let index = match type_names
                .iter()
                .position(|candidate| *candidate == type_name.as_ref())
            {
                Some(index) => index,
                None => {
                    type_names.push(type_name.as_ref());
                    type_names.len() - 1
                }
            };

            let index =
                u32::try_from(index).map_err(|_| Error::Oversized("declared type name list"))?;

            write_seven_bit_encoded(dest, USER_TYPE_START + index)?;
            dest.write_all(data)?;
        }
    }

    Ok(())
}

/// Serialize a set of entries already keyed (and therefore sorted) by name.
///
/// The complete container is laid out in memory first and written to
/// `dest` as a single bulk write, so a failure cannot leave a partial
/// layout behind and the sink needs no seek capability.
pub(crate) fn write_sorted_entries<W: Write>(
    entries: &BTreeMap<&str, &Value<'_>>,
    dest: &mut W,
) -> Result<()> {
    // The name and data sections are emitted in name order. The hash and
    // position tables are then sorted by hash so decoders can binary
    // search them.
    let mut type_names = Vec::new();
    let mut name_section = Vec::new();
    let mut data_section = Vec::new();
    let mut index = Vec::with_capacity(entries.len());

    for (name, value) in entries {
        let name_position =
            u32::try_from(name_section.len()).map_err(|_| Error::Oversized("name section"))?;
        let data_offset =
            u32::try_from(data_section.len()).map_err(|_| Error::Oversized("data section"))?;

        index.push((resource_name_hash(name), name_position));

        write_utf16_string(&mut name_section, name)?;
        name_section.write_u32::<LittleEndian>(data_offset)?;

        write_value(&mut data_section, value, &mut type_names)?;
    }

    // Entries arrive in name order, so the stable sort gives colliding
    // hashes a deterministic relative order.
    index.sort_by_key(|(hash, _)| *hash);

    let resources_count =
        u32::try_from(entries.len()).map_err(|_| Error::Oversized("resource count"))?;
    let type_count =
        u32::try_from(type_names.len()).map_err(|_| Error::Oversized("declared type name list"))?;

    // The resource manager header identifies the reader and resource set
    // types needed to decode the container. Its byte length is written
    // before its content so decoders can skip it wholesale.
    let mut header = Vec::new();
    write_utf8_string(&mut header, RESOURCE_READER_TYPE_NAME)?;
    write_utf8_string(&mut header, RESOURCE_SET_TYPE_NAME)?;

    let header_length =
        u32::try_from(header.len()).map_err(|_| Error::Oversized("resource manager header"))?;

    let mut container = Vec::new();
    container.write_u32::<LittleEndian>(MAGIC_NUMBER)?;
    container.write_u32::<LittleEndian>(RESOURCE_MANAGER_HEADER_VERSION)?;
    container.write_u32::<LittleEndian>(header_length)?;
    container.write_all(&header)?;

    container.write_u32::<LittleEndian>(RUNTIME_RESOURCE_SET_VERSION)?;
    container.write_u32::<LittleEndian>(resources_count)?;
    container.write_u32::<LittleEndian>(type_count)?;

    for type_name in &type_names {
        write_utf8_string(&mut container, type_name)?;
    }

    // The hash table must start on an 8 byte boundary.
    let position = container.len();
    write_alignment_padding(&mut container, position)?;

    for (hash, _) in &index {
        container.write_u32::<LittleEndian>(*hash)?;
    }

    for (_, name_position) in &index {
        container.write_u32::<LittleEndian>(*name_position)?;
    }

    // Absolute position where the data section begins: past this field
    // and the name section.
    let data_section_offset = u32::try_from(container.len() + 4 + name_section.len())
        .map_err(|_| Error::Oversized("container"))?;

    container.write_u32::<LittleEndian>(data_section_offset)?;
    container.write_all(&name_section)?;
    container.write_all(&data_section)?;

    dest.write_all(&container)?;

    Ok(())
}

/// Write a complete binary resources container.
///
/// This is a pure function of the resource set: entries may be given in
/// any order and the output is identical for identical sets. Duplicate
/// names are rejected.
pub fn write_resources<W: Write>(resources: &[Resource<'_>], dest: &mut W) -> Result<()> {
    let mut entries = BTreeMap::new();

    for resource in resources {
        if entries
            .insert(resource.name.as_ref(), &resource.value)
            .is_some()
        {
            return Err(Error::DuplicateName(resource.name.clone().into_owned()));
        }
    }

    write_sorted_entries(&entries, dest)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Finalized,
    Closed,
    Poisoned,
}

/// Accumulates named resources and serializes them to a sink.
///
/// The writer is a stateful builder meant to be driven by a single
/// owner: resources are buffered in memory via [Self::add_resource],
/// then [Self::generate] emits the complete container in one bulk
/// write. It follows an `Open -> Finalized -> Closed` lifecycle.
///
/// Dropping pending data is loud by contract: [Self::close] fails if
/// resources were added but never generated, rather than silently
/// discarding them. Callers are expected to call `close` on all exit
/// paths and handle its result.
#[derive(Debug)]
pub struct ResourceWriter<'a, W: Write> {
    sink: W,
    resources: BTreeMap<String, Value<'a>>,
    state: State,
}

impl<'a, W: Write> ResourceWriter<'a, W> {
    /// Construct a writer emitting to `sink`.
    ///
    /// The writer does not assume ownership of the sink's lifetime
    /// beyond its own: generating flushes bytes but never closes the
    /// sink.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            resources: BTreeMap::new(),
            state: State::Open,
        }
    }

    /// Buffer a named resource for serialization.
    ///
    /// Names are case sensitive and must be unique: re-adding a name is
    /// an error on the second call, never a silent overwrite. The
    /// writer remains usable after a rejected add.
    pub fn add_resource(&mut self, name: impl Into<String>, value: impl Into<Value<'a>>) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::NotOpen);
        }

        let name = name.into();

        if self.resources.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }

        self.resources.insert(name, value.into());

        Ok(())
    }

    /// Serialize all buffered resources to the sink.
    ///
    /// The container layout is computed fully in memory before any byte
    /// reaches the sink. Output is deterministic: it depends only on
    /// the set of (name, value) entries, not on insertion order.
    pub fn generate(&mut self) -> Result<()> {
        match self.state {
            State::Open => {}
            State::Finalized => return Err(Error::AlreadyGenerated),
            State::Closed | State::Poisoned => return Err(Error::NotOpen),
        }

        let entries = self
            .resources
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect::<BTreeMap<_, _>>();

        write_sorted_entries(&entries, &mut self.sink)?;

        self.state = State::Finalized;

        Ok(())
    }

    /// Release the writer.
    ///
    /// After a successful [Self::generate] this is an idempotent no-op.
    /// Closing while resources are pending and never generated fails
    /// with [Error::PendingResources] and discards the buffered data; a
    /// further close after that fails with [Error::AlreadyClosed] and
    /// never attempts to flush anything.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            State::Open => {
                if self.resources.is_empty() {
                    self.state = State::Closed;
                    Ok(())
                } else {
                    self.state = State::Poisoned;
                    self.resources.clear();
                    Err(Error::PendingResources)
                }
            }
            State::Finalized => {
                self.sink.flush()?;
                self.state = State::Closed;
                Ok(())
            }
            State::Closed => Ok(()),
            State::Poisoned => Err(Error::AlreadyClosed),
        }
    }
}
