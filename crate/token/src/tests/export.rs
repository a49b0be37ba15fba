use super::logged_in_session;
use crate::{
    KeyGenOptions, KeyGenParams, KeyUsage, NamedCurve, TResult, TokenError, export_key,
};

#[test]
fn test_export_private_ec() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let pair = session
        .generate(
            &KeyGenParams::ecdsa(NamedCurve::Secp256r1),
            &KeyGenOptions::with_usage(KeyUsage::SIGN | KeyUsage::VERIFY)
                .sensitive(false)
                .extractable(true),
        )?
        .into_pair()?;
    let jwk = pair.private_key.export_jwk()?;
    assert_eq!(jwk.kty, "EC");
    assert_eq!(jwk.crv.as_deref(), Some("P-256"));
    assert_eq!(jwk.key_ops, Some(vec!["sign".to_owned()]));
    assert_eq!(jwk.d.as_ref().map(String::len), Some(43));
    assert!(jwk.use_.is_none());
    assert!(jwk.x.is_none());

    let json = pair.public_key.export_jwk()?.to_json()?;
    assert!(json.contains(r#""use":"sig""#));
    assert!(json.contains(r#""crv":"P-256""#));
    assert!(!json.contains("key_ops"));
    Ok(())
}

#[test]
fn test_export_private_rsa() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let pair = session
        .generate(
            &KeyGenParams::rsa(1024),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT | KeyUsage::DECRYPT)
                .sensitive(false)
                .extractable(true),
        )?
        .into_pair()?;
    let jwk = pair.private_key.export_jwk()?;
    assert_eq!(jwk.kty, "RSA");
    assert_eq!(jwk.key_ops, Some(vec!["decrypt".to_owned()]));
    assert_eq!(jwk.e.as_deref(), Some("AQAB"));
    for component in [&jwk.d, &jwk.p, &jwk.q, &jwk.dp, &jwk.dq, &jwk.qi] {
        assert!(component.is_some());
    }

    // the usages to declare can be narrowed by the caller
    assert!(matches!(
        export_key(&pair.private_key, KeyUsage::ENCRYPT),
        Err(TokenError::NoAllowedUsage)
    ));
    let public = export_key(&pair.public_key, KeyUsage::ENCRYPT)?;
    assert_eq!(public.use_.as_deref(), Some("enc"));
    assert_eq!(public.n, jwk.n);
    Ok(())
}

#[test]
fn test_export_sensitive_private_key() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let pair = session
        .generate(
            &KeyGenParams::ecdsa(NamedCurve::Secp384r1),
            &KeyGenOptions::with_usage(KeyUsage::SIGN),
        )?
        .into_pair()?;
    assert!(matches!(
        pair.private_key.export_jwk(),
        Err(TokenError::KeyUsage(_))
    ));
    Ok(())
}

#[test]
fn test_export_secret() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let key = session
        .generate(
            &KeyGenParams::aes(256),
            &KeyGenOptions::with_usage(KeyUsage::ENCRYPT | KeyUsage::DECRYPT)
                .sensitive(false)
                .extractable(true),
        )?
        .into_secret()?;
    let jwk = key.export_jwk()?;
    assert_eq!(jwk.kty, "oct");
    assert_eq!(jwk.k.as_ref().map(String::len), Some(43));
    assert_eq!(
        jwk.key_ops,
        Some(vec!["encrypt".to_owned(), "decrypt".to_owned()])
    );
    Ok(())
}

#[test]
fn test_export_ec_p521() -> TResult<()> {
    let (_token, session) = logged_in_session()?;
    let pair = session
        .generate(
            &KeyGenParams::ecdsa(NamedCurve::Secp521r1),
            &KeyGenOptions::with_usage(KeyUsage::VERIFY),
        )?
        .into_pair()?;
    // 133 bytes points use the long form DER length
    let jwk = pair.public_key.export_jwk()?;
    assert_eq!(jwk.crv.as_deref(), Some("P-521"));
    // 66 bytes encode to 88 base64url characters
    assert_eq!(jwk.x.as_ref().map(String::len), Some(88));
    assert_eq!(jwk.y.as_ref().map(String::len), Some(88));
    Ok(())
}
