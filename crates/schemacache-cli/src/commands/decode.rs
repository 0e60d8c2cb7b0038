use anyhow::{Result, bail};
use schemacache::wire::{HEADER_LEN, decode_schema_id};

use crate::cli::DecodeArgs;
use crate::output::{print_field, print_warning};

pub fn run(args: &DecodeArgs) -> Result<()> {
    let bytes = parse_hex(&args.hex)?;

    match decode_schema_id(&bytes) {
        Some(id) => {
            print_field("Schema id", id);
            print_field("Payload bytes", bytes.len() - HEADER_LEN);
        }
        None => print_warning("No schema: message is too short, has the wrong magic byte or a non-positive id"),
    }
    Ok(())
}

/// Parse hex digits, ignoring whitespace and an optional `0x` prefix.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let digits: Vec<u8> = trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    if digits.len() % 2 != 0 {
        bail!("hex input has an odd number of digits");
    }

    digits
        .chunks(2)
        .map(|pair| -> Result<u8> { Ok((nibble(pair[0])? << 4) | nibble(pair[1])?) })
        .collect()
}

fn nibble(digit: u8) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        other => bail!("invalid hex digit: {:?}", other as char),
    }
}
