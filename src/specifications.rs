// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Specifications

# Binary Resources Data

A binary resources container serializes a set of named, typed values
into a single self-describing blob. A producer accumulates (name, value)
entries and emits the container in one pass; a consumer can either
enumerate all entries or locate one by name via binary search over a
sorted hash table, without decoding unrelated values.

The format of the serialized data structure is as follows. All integers
are little-endian. Two string encodings appear, both prefixed with a
*7-bit encoded* byte length (unsigned base-128, 7 payload bits per byte,
high bit set on continuation bytes):

* *UTF-8 strings*: the identity strings, declared type names, and
  string values.
* *UTF-16 strings*: resource names, stored as UTF-16LE code units. The
  length prefix counts bytes, not code units.

## Resource manager header

The container begins with:

* A `u32` magic number, `0xBEEFCACE`.
* A `u32` resource manager header version, currently `1`.
* A `u32` byte length of the remaining header, allowing a consumer to
  skip it wholesale.
* A UTF-8 string naming the reader type able to decode the container
  (`System.Resources.ResourceReader, mscorlib, Version=4.0.0.0,
  Culture=neutral, PublicKeyToken=b77a5c561934e089`).
* A UTF-8 string naming the resource set type consuming decoded
  containers (`System.Resources.RuntimeResourceSet`).

## Resource set header

Following the resource manager header:

* A `u32` resource set version, currently `2`.
* A `u32` count of resources in the container.
* A `u32` count of declared type names, followed by that many UTF-8
  strings. Only non-primitive value types are declared here; built-in
  kinds encode their discriminator directly.
* Filler bytes cycling the pattern `PAD` until the absolute stream
  position is a multiple of 8. The padding is part of the format, not
  an optimization: consumers compute the table position from the
  alignment rule.

## Index tables

* The *hash table*: one `u32` per resource, holding the hash of its
  name, sorted ascending so consumers can binary search.
* The *position table*: one `u32` per resource, parallel to the hash
  table, holding the byte offset of the resource's entry within the
  name section.
* A `u32` holding the absolute stream position where the data section
  begins. Everything between this field and that position is the name
  section.

The name hash is a djb2 XOR variant over the name's UTF-16 code units,
seeded with 5381:

```text
hash = 5381
for unit in name:
    hash = (hash << 5) + hash ^ unit     (wrapping u32)
```

Ties between colliding hashes are resolved by probing: consumers must
compare the stored name before trusting a hash match.

## Name section

One entry per resource, in ordinal name order (byte-wise comparison of
UTF-16 code units). Each entry is the resource name as a UTF-16 string
followed by a `u32` offset of the resource's value, relative to the
start of the data section.

Note the two orders in play: the name and data sections are laid out in
name order, while the hash and position tables are sorted by hash value.
The position table is what connects a hash slot back to its entry.

## Data section

One value per resource, in the same order as the name section. Each
value is a 7-bit encoded type discriminator followed by a kind-specific
payload:

| discriminator | kind      | payload |
|---------------|-----------|---------|
| `0x00`        | Null      | none |
| `0x01`        | String    | UTF-8 string |
| `0x02`        | Boolean   | `u8`, zero is false |
| `0x03`        | Char      | `u16` UTF-16 code unit |
| `0x04`        | Byte      | `u8` |
| `0x05`        | SByte     | `i8` |
| `0x06`        | Int16     | `i16` |
| `0x07`        | UInt16    | `u16` |
| `0x08`        | Int32     | `i32` |
| `0x09`        | UInt32    | `u32` |
| `0x0a`        | Int64     | `i64` |
| `0x0b`        | UInt64    | `u64` |
| `0x0c`        | Single    | `f32` |
| `0x0d`        | Double    | `f64` |
| `0x20`        | ByteArray | `u32` length, then raw bytes |
| `0x40 + n`    | declared  | raw bytes, verbatim |

A discriminator of `0x40` or above references the `n`th declared type
name from the resource set header. The payload is whatever the producer
serialized; it carries no length of its own, so its extent runs to the
next entry's value offset (or the end of the container for the last
value in data order).

Discriminators `0x0e` through `0x10` (Decimal, DateTime, TimeSpan) and
`0x21` (Stream) are reserved by the runtime's type system and are not
produced by this crate; parsers report them as unsupported.

## Determinism

The container is a pure function of the (name, value) set. Insertion
order never leaks into the output: entries are laid out in name order,
the index tables are sorted by hash with name order breaking ties, and
declared type names are recorded in first-use order of the data
section. Serializing, parsing, and re-serializing a container yields an
identical byte stream.
*/
