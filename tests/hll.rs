
use anyhow::Result;
use fact_distinct::HllCounter;

fn counter_of(range: std::ops::Range<u32>) -> Result<HllCounter> {
    let mut hll = HllCounter::new(14)?;
    for i in range {
        hll.add_bytes(format!("value-{i}").as_bytes());
    }
    Ok(hll)
}

#[test]
fn estimate_within_error_bound() -> Result<()> {
    for n in [10u32, 1_000, 50_000] {
        let hll = counter_of(0..n)?;
        // six standard errors, a little under 5% at precision 14
        assert_within_rel!(hll.count_estimate(), n, 6.0 * hll.relative_standard_error());
    }
    Ok(())
}

#[test]
fn duplicates_do_not_count() -> Result<()> {
    let mut hll = HllCounter::new(14)?;
    for _ in 0..3 {
        for i in 0..100 {
            hll.add_bytes(format!("value-{i}").as_bytes());
        }
    }
    assert_eq!(hll.count_estimate(), counter_of(0..100)?.count_estimate());
    Ok(())
}

#[test]
fn merge_is_commutative_and_associative() -> Result<()> {
    let a = counter_of(0..3_000)?;
    let b = counter_of(2_000..9_000)?;
    let c = counter_of(8_500..8_600)?;

    let mut ab_c = a.clone();
    ab_c.merge(&b)?;
    ab_c.merge(&c)?;

    let mut bc = b.clone();
    bc.merge(&c)?;
    let mut a_bc = a.clone();
    a_bc.merge(&bc)?;

    let mut c_b_a = c.clone();
    c_b_a.merge(&b)?;
    c_b_a.merge(&a)?;

    assert_eq!(ab_c, a_bc);
    assert_eq!(ab_c, c_b_a);
    assert_eq!(ab_c.count_estimate(), c_b_a.count_estimate());
    assert_eq!(ab_c, counter_of(0..9_000)?);
    Ok(())
}

#[test]
fn merge_is_idempotent() -> Result<()> {
    let a = counter_of(0..500)?;
    let mut twice = a.clone();
    twice.merge(&a)?;
    assert_eq!(twice, a);
    Ok(())
}

#[test]
fn precision_mismatch_is_an_error() -> Result<()> {
    let mut a = HllCounter::new(14)?;
    let b = HllCounter::new(12)?;
    assert!(a.merge(&b).is_err());
    assert!(HllCounter::new(3).is_err());
    assert!(HllCounter::new(19).is_err());
    Ok(())
}

#[test]
fn wire_payload_survives_both_encodings() -> Result<()> {
    let small = counter_of(0..20)?;
    let large = counter_of(0..40_000)?;
    for hll in [&small, &large] {
        let bytes = hll.to_bytes();
        let back = HllCounter::read_registers(&bytes, 14)?;
        assert_eq!(&back, hll);
        assert_eq!(back.count_estimate(), hll.count_estimate());
    }
    // sparse wins while few registers are set
    assert!(small.to_bytes().len() < 1 << 14);
    assert_eq!(large.to_bytes().len(), 2 + (1 << 14));
    Ok(())
}

#[test]
fn sparse_payload_layout() -> Result<()> {
    let one = counter_of(0..1)?;
    let bytes = one.to_bytes();
    // precision, scheme, u32 count, then one (u32 index, u8 value) entry
    assert_eq!(bytes.len(), 2 + 4 + 5);
    assert_eq!(bytes[..2], [14, 0]);
    assert_eq!(bytes[2..6], 1u32.to_be_bytes());
    assert_ne!(bytes[10], 0);

    // appending after existing bytes keeps them intact
    let mut out = b"prefix".to_vec();
    one.write_registers(&mut out);
    assert_eq!(&out[..6], b"prefix");
    assert_eq!(HllCounter::read_registers(&out[6..], 14)?, one);
    Ok(())
}

#[test]
fn corrupt_payloads_are_rejected() -> Result<()> {
    let bytes = counter_of(0..20)?.to_bytes();
    assert!(HllCounter::read_registers(&bytes, 12).is_err());
    assert!(HllCounter::read_registers(&bytes[..bytes.len() - 1], 14).is_err());
    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(HllCounter::read_registers(&trailing, 14).is_err());
    assert!(HllCounter::read_registers(&[], 14).is_err());
    Ok(())
}
