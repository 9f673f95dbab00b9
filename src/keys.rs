// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Pure key-formatting functions (§4.4). Every cache, write-buffer, and
//! object-store key is an ampersand-joined ASCII string built from a
//! channel's lookup key, a resolution, a time sample, and a Morton id —
//! these functions are the single place that format agrees with the rest
//! of the system.

/// Lookup key for a channel: `"C&E&N"` (collection, experiment, channel).
pub type LookupKey<'a> = &'a str;

fn cached_cuboid_base(lookup_key: LookupKey<'_>, resolution: u32, iso: bool) -> String {
    if iso {
        format!("CACHED-CUBOID&ISO&{lookup_key}&{resolution}")
    } else {
        format!("CACHED-CUBOID&{lookup_key}&{resolution}")
    }
}

/// `CACHED-CUBOID&L&r&t&m`, with `&ISO` inserted after the prefix when
/// `iso` is set.
#[must_use]
pub fn cached_cuboid_key(lookup_key: LookupKey<'_>, resolution: u32, time_sample: u32, morton: u64, iso: bool) -> String {
    format!("{}&{time_sample}&{morton}", cached_cuboid_base(lookup_key, resolution, iso))
}

fn write_buffer_base(prefix: &str, lookup_key: LookupKey<'_>, resolution: u32, iso: bool) -> String {
    if iso {
        format!("{prefix}&ISO&{lookup_key}&{resolution}")
    } else {
        format!("{prefix}&{lookup_key}&{resolution}")
    }
}

/// `WRITE-CUBOID&L&r&t&m&U` where `U` is a fresh UUID.
#[must_use]
pub fn write_cuboid_key(lookup_key: LookupKey<'_>, resolution: u32, time_sample: u32, morton: u64, iso: bool) -> String {
    let uuid = uuid::Uuid::new_v4();
    format!(
        "{}&{time_sample}&{morton}&{uuid}",
        write_buffer_base("WRITE-CUBOID", lookup_key, resolution, iso)
    )
}

/// `BLACK-CUBOID&L&r&t&m&U` — a write-to-black request, same shape as
/// [`write_cuboid_key`].
#[must_use]
pub fn black_cuboid_key(lookup_key: LookupKey<'_>, resolution: u32, time_sample: u32, morton: u64, iso: bool) -> String {
    let uuid = uuid::Uuid::new_v4();
    format!(
        "{}&{time_sample}&{morton}&{uuid}",
        write_buffer_base("BLACK-CUBOID", lookup_key, resolution, iso)
    )
}

/// Strips the trailing `&UUID` suffix and swaps the `WRITE-CUBOID`/
/// `BLACK-CUBOID` prefix for `CACHED-CUBOID`, turning a flushed write-buffer
/// key into the cache key it should land at.
#[must_use]
pub fn write_key_to_cached_key(write_key: &str) -> Option<String> {
    let rest = write_key
        .strip_prefix("WRITE-CUBOID&")
        .or_else(|| write_key.strip_prefix("BLACK-CUBOID&"))?;

    let (without_uuid, _uuid) = rest.rsplit_once('&')?;
    Some(format!("CACHED-CUBOID&{without_uuid}"))
}

/// `H&L&r&t&m` where `H = md5(L&r&t&m)` hex — the durable object store's
/// key, also used as the DynamoDB s3-index row key. `&ISO` is inserted
/// the same way as [`cached_cuboid_key`], *inside* the hashed portion.
#[must_use]
pub fn object_key(lookup_key: LookupKey<'_>, resolution: u32, time_sample: u32, morton: u64, iso: bool) -> String {
    let base = if iso {
        format!("ISO&{lookup_key}&{resolution}&{time_sample}&{morton}")
    } else {
        format!("{lookup_key}&{resolution}&{time_sample}&{morton}")
    };
    format!("{}&{base}", md5_hex(&base))
}

/// `md5(L&r&id) & L & r & id` — the id-index table's row key for one
/// `(channel, resolution, annotation id)` tuple.
#[must_use]
pub fn id_index_key(lookup_key: LookupKey<'_>, resolution: u32, id: u64) -> String {
    let base = format!("{lookup_key}&{resolution}&{id}");
    format!("{}&{base}", md5_hex(&base))
}

/// `md5(L) & L` — the id-count table's row key for one channel.
#[must_use]
pub fn id_count_key(lookup_key: LookupKey<'_>) -> String {
    format!("{}&{lookup_key}", md5_hex(lookup_key))
}

/// `L&r&m` — the reverse cuboid-to-id-set table's row key for one
/// `(channel, resolution, morton)` tuple, used by `ids_in_region`'s
/// interior fast path to read a cuboid's indexed ids without a cutout.
#[must_use]
pub fn cuboid_id_set_key(lookup_key: LookupKey<'_>, resolution: u32, morton: u64) -> String {
    format!("{lookup_key}&{resolution}&{morton}")
}

fn md5_hex(input: &str) -> String {
    let digest = md5::Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

use md5::Digest;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn cached_cuboid_key_format() {
        let key = cached_cuboid_key("coll&exp&chan", 0, 1, 42, false);
        assert_eq!(key, "CACHED-CUBOID&coll&exp&chan&0&1&42");
    }

    #[test]
    fn cached_cuboid_key_iso_inserts_marker() {
        let key = cached_cuboid_key("coll&exp&chan", 0, 1, 42, true);
        assert_eq!(key, "CACHED-CUBOID&ISO&coll&exp&chan&0&1&42");
    }

    #[test]
    fn write_cuboid_key_has_uuid_suffix() {
        let key = write_cuboid_key("coll&exp&chan", 0, 1, 42, false);
        assert!(key.starts_with("WRITE-CUBOID&coll&exp&chan&0&1&42&"));
        let parts: Vec<_> = key.split('&').collect();
        assert_eq!(parts.len(), 7);
        assert!(uuid::Uuid::parse_str(parts[6]).is_ok());
    }

    #[test]
    fn write_key_strips_uuid_and_swaps_prefix() {
        let write_key = write_cuboid_key("coll&exp&chan", 0, 1, 42, false);
        let cached = write_key_to_cached_key(&write_key).unwrap();
        assert_eq!(cached, "CACHED-CUBOID&coll&exp&chan&0&1&42");
    }

    #[test]
    fn black_key_strips_uuid_and_swaps_prefix() {
        let black_key = black_cuboid_key("coll&exp&chan", 0, 1, 42, false);
        let cached = write_key_to_cached_key(&black_key).unwrap();
        assert_eq!(cached, "CACHED-CUBOID&coll&exp&chan&0&1&42");
    }

    #[test]
    fn object_key_prefixes_md5_of_base() {
        let key = object_key("coll&exp&chan", 0, 1, 42, false);
        let (hash, rest) = key.split_once('&').unwrap();
        assert_eq!(hash.len(), 32);
        assert_eq!(rest, "coll&exp&chan&0&1&42");
        assert_eq!(hash, md5_hex(rest));
    }

    #[test]
    fn id_index_key_is_deterministic() {
        let a = id_index_key("coll&exp&chan", 0, 7);
        let b = id_index_key("coll&exp&chan", 0, 7);
        assert_eq!(a, b);
        assert!(a.starts_with(&md5_hex("coll&exp&chan&0&7")));
    }

    #[test]
    fn id_count_key_matches_md5_of_lookup_key() {
        let key = id_count_key("coll&exp&chan");
        assert_eq!(key, format!("{}&coll&exp&chan", md5_hex("coll&exp&chan")));
    }

    #[test]
    fn cuboid_id_set_key_is_plain_and_deterministic() {
        assert_eq!(cuboid_id_set_key("coll&exp&chan", 0, 42), "coll&exp&chan&0&42");
        assert_eq!(cuboid_id_set_key("coll&exp&chan", 0, 42), cuboid_id_set_key("coll&exp&chan", 0, 42));
    }
}
