use sshmux::{
    crypto::{AlgorithmProvider, Category},
    fingerprint, DefaultProvider,
};

#[test]
fn supported_algorithms_are_ordered_by_preference() {
    let provider = DefaultProvider::default();
    assert_eq!(provider.supported(Category::Kex)[0], "curve25519-sha256");
    assert_eq!(
        provider.supported(Category::Cipher)[0],
        "chacha20-poly1305@openssh.com"
    );
    assert_eq!(provider.supported(Category::Compression), vec!["none"]);
    assert!(provider
        .supported(Category::HostKey)
        .contains(&"rsa-sha2-256"));
}

#[test]
fn unknown_names_are_errors() {
    let provider = DefaultProvider::default();
    assert!(provider.kex("diffie-hellman-group1-sha1").is_err());
    assert!(provider.cipher_spec("3des-cbc").is_err());
    assert!(provider.mac_spec("hmac-md5").is_err());
    assert!(provider.hash("md5").is_err());
}

#[test]
fn aead_ciphers_report_their_tag() {
    let provider = DefaultProvider::default();
    let spec = provider.cipher_spec("chacha20-poly1305@openssh.com").unwrap();
    assert!(spec.is_aead());
    assert_eq!(spec.key_len, 64);
    assert!(!provider.cipher_spec("aes256-ctr").unwrap().is_aead());
}

#[test]
fn sha256_digest() {
    let provider = DefaultProvider::default();
    let mut hash = provider.hash("sha256").unwrap();
    hash.update(b"abc");
    assert_eq!(
        hash.finalize()[..4],
        [0xba, 0x78, 0x16, 0xbf],
    );
}

#[test]
fn curve25519_agreement() -> anyhow::Result<()> {
    let provider = DefaultProvider::default();
    let a = provider.kex("curve25519-sha256")?;
    let b = provider.kex("curve25519-sha256")?;
    let a_public = a.public_value().to_vec();
    let b_public = b.public_value().to_vec();
    let a_secret = a.agree(&b_public)?;
    let b_secret = b.agree(&a_public)?;
    assert_eq!(&a_secret[..], &b_secret[..]);
    Ok(())
}

#[test]
fn fingerprint_of_host_key() -> anyhow::Result<()> {
    let provider = DefaultProvider::default();
    let mut blob = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20".to_vec();
    blob.extend(0..32u8);
    let fingerprint = fingerprint(&provider, &blob)?;
    assert!(fingerprint.starts_with("SHA256:"));
    assert!(!fingerprint.ends_with('='));
    Ok(())
}
