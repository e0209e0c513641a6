use super::*;

use pretty_assertions::assert_eq;

#[test]
fn parse_addr_hex_and_decimal() {
    assert_eq!(Ok(0xffff_ffff_8301_2780), parse_addr("0xffffffff83012780"));
    assert_eq!(Ok(0x2a0_0000), parse_addr("0X2A00000"));
    assert_eq!(Ok(1_048_576), parse_addr("1048576"));
    assert_eq!(Ok(0), parse_addr(" 0 "));
}

#[test]
fn parse_addr_invalid() {
    assert!(parse_addr("").is_err());
    assert!(parse_addr("0x").is_err());
    assert!(parse_addr("ffff").is_err());
    assert!(parse_addr("-1").is_err());
}
