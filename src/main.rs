use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{info, LevelFilter};
use zeroize::Zeroizing;

use cmld_trust::config::{CsrSpec, KeyPadding, KeySpec, CSRSPEC_EXT, KEYSPEC_EXT};
use cmld_trust::container::ContainerRegistry;
use cmld_trust::crypto::{cert, csr, hash, keys, pkcs12, sign, Padding};
use cmld_trust::error::Verdict;
use cmld_trust::wrap::{asym, sym};

const PASSWD_PROMPT: &str = "Enter passphrase: ";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Increase verbosity
    #[clap(long, env)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA keypair and write it to disk, PEM-encoded.
    Keygen {
        #[clap(long, env)]
        out_key: PathBuf,
        #[clap(long, env, value_enum, default_value = "rsa")]
        padding: PaddingArg,
        #[clap(long, env)]
        passphrase: bool,
    },
    /// Create a CSR (and, unless reusing a TPM key, a fresh keypair).
    Csr {
        #[clap(long, env)]
        out_req: PathBuf,
        #[clap(long, env)]
        key_path: PathBuf,
        #[clap(long, env)]
        common_name: String,
        #[clap(long, env)]
        uid: String,
        #[clap(long, env)]
        use_tpm_key: bool,
        #[clap(long, env, value_enum, default_value = "rsa")]
        padding: PaddingArg,
        #[clap(long, env)]
        passphrase: bool,
    },
    /// Self-sign a CSR, copying its subject and public key into a
    /// trusted self-signed user certificate.
    SelfSign {
        #[clap(long, env)]
        csr_path: PathBuf,
        #[clap(long, env)]
        out_cert: PathBuf,
        #[clap(long, env)]
        signing_key: PathBuf,
        #[clap(long, env)]
        use_tpm_key: bool,
    },
    /// Batch-drive key generation and CSR creation from `*.keyspec.json`/
    /// `*.csrspec.json` files in a directory.
    Batch {
        #[clap(long, env)]
        spec_dir: PathBuf,
        #[clap(long, env)]
        out_dir: PathBuf,
    },
    #[command(subcommand)]
    Pkcs12(Pkcs12Command),
    #[command(subcommand)]
    Verify(VerifyCommand),
    /// Hash a file with a named digest (e.g. sha256).
    Hash {
        #[clap(long, env)]
        path: PathBuf,
        #[clap(long, env, default_value = "sha256")]
        digest: String,
    },
    #[command(subcommand)]
    Wrap(WrapCommand),
    #[command(subcommand)]
    Hotplug(HotplugCommand),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PaddingArg {
    Rsa,
    RsaPss,
}

impl From<PaddingArg> for Padding {
    fn from(p: PaddingArg) -> Padding {
        match p {
            PaddingArg::Rsa => Padding::Rsa,
            PaddingArg::RsaPss => Padding::RsaPss,
        }
    }
}

impl From<KeyPadding> for Padding {
    fn from(p: KeyPadding) -> Padding {
        match p {
            KeyPadding::Rsa => Padding::Rsa,
            KeyPadding::RsaPss => Padding::RsaPss,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Pkcs12Command {
    /// Create a PKCS#12 soft token from a cert and its private key.
    Pkcs12Create {
        #[clap(long, env)]
        token_path: PathBuf,
        #[clap(long, env)]
        cert_path: PathBuf,
        #[clap(long, env)]
        common_name: String,
        #[clap(long, env, value_enum, default_value = "rsa")]
        padding: PaddingArg,
    },
    /// Change a soft token's passphrase in place.
    Pkcs12Rekey {
        #[clap(long, env)]
        token_path: PathBuf,
    },
    /// Read back a soft token's certificate subject, as a sanity check.
    Pkcs12Read {
        #[clap(long, env)]
        token_path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum VerifyCommand {
    /// Verify a leaf certificate against a root, optionally tolerating
    /// expiry/not-yet-valid errors.
    VerifyCert {
        #[clap(long, env)]
        leaf: PathBuf,
        #[clap(long, env)]
        root: PathBuf,
        #[clap(long, env)]
        ignore_time: bool,
    },
    /// Verify a detached signature over a signed file against a
    /// certificate's public key.
    VerifySig {
        #[clap(long, env)]
        cert: PathBuf,
        #[clap(long, env)]
        sig: PathBuf,
        #[clap(long, env)]
        signed_file: PathBuf,
        #[clap(long, env, default_value = "sha256")]
        digest: String,
    },
}

#[derive(Subcommand, Debug)]
enum WrapCommand {
    /// Wrap a plaintext key with a 32-byte KEK (AES-256 key wrap).
    WrapSym {
        #[clap(long, env)]
        kek_hex: String,
        #[clap(long, env)]
        plain_path: PathBuf,
        #[clap(long, env)]
        out_path: PathBuf,
    },
    /// Undo `wrap-sym`.
    UnwrapSym {
        #[clap(long, env)]
        kek_hex: String,
        #[clap(long, env)]
        wrapped_path: PathBuf,
        #[clap(long, env)]
        out_path: PathBuf,
    },
    /// Wrap a plaintext under a recipient's RSA public key (hybrid
    /// envelope).
    WrapAsym {
        #[clap(long, env)]
        recipient_cert: PathBuf,
        #[clap(long, env)]
        plain_path: PathBuf,
        #[clap(long, env)]
        out_path: PathBuf,
    },
    /// Undo `wrap-asym`.
    UnwrapAsym {
        #[clap(long, env)]
        recipient_key: PathBuf,
        #[clap(long, env)]
        envelope_path: PathBuf,
        #[clap(long, env)]
        out_path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum HotplugCommand {
    /// Run the uevent router against the live kernel uevent stream.
    /// Requires root and a real netlink socket; not part of this crate's
    /// own test suite.
    Run {
        #[clap(long, env)]
        hosted_mode: bool,
    },
}

fn get_passphrase() -> Result<Zeroizing<Vec<u8>>> {
    let pw = rpassword::prompt_password(PASSWD_PROMPT)?;
    Ok(Zeroizing::new(pw.into_bytes()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    Builder::from_default_env().filter(None, level).init();

    match args.command {
        Command::Keygen { out_key, padding, passphrase } => {
            let keypair = keys::make_keypair(padding.into())?;
            let pem = if passphrase {
                let pw = get_passphrase()?;
                keypair.pkey.private_key_to_pem_pkcs8_passphrase(
                    openssl::symm::Cipher::aes_256_cbc(),
                    &pw,
                )?
            } else {
                keypair.pkey.private_key_to_pem_pkcs8()?
            };
            fs::write(&out_key, pem).with_context(|| format!("writing {}", out_key.display()))?;
            info!("wrote keypair to {}", out_key.display());
            Ok(())
        }
        Command::Csr { out_req, key_path, common_name, uid, use_tpm_key, padding, passphrase } => {
            let pw = if passphrase { Some(get_passphrase()?) } else { None };
            csr::create_csr(
                &out_req,
                &key_path,
                pw.as_deref(),
                &common_name,
                &uid,
                use_tpm_key,
                padding.into(),
            )?;
            info!("wrote CSR to {}", out_req.display());
            Ok(())
        }
        Command::SelfSign { csr_path, out_cert, signing_key, use_tpm_key } => {
            cert::self_sign_csr(&csr_path, &out_cert, &signing_key, use_tpm_key)?;
            info!("wrote self-signed certificate to {}", out_cert.display());
            Ok(())
        }
        Command::Batch { spec_dir, out_dir } => run_batch(&spec_dir, &out_dir),
        Command::Pkcs12(cmd) => match cmd {
            Pkcs12Command::Pkcs12Create { token_path, cert_path, common_name, padding } => {
                let pw = get_passphrase()?;
                pkcs12::create_pkcs12(&token_path, Some(&cert_path), &pw, &common_name, padding.into())?;
                info!("wrote PKCS#12 token to {}", token_path.display());
                Ok(())
            }
            Pkcs12Command::Pkcs12Rekey { token_path } => {
                let old_pw = rpassword::prompt_password("Enter current passphrase: ")?;
                let new_pw = get_passphrase()?;
                pkcs12::rekey_pkcs12(
                    &token_path,
                    Zeroizing::new(old_pw.into_bytes()).as_slice(),
                    &new_pw,
                )?;
                info!("rekeyed {}", token_path.display());
                Ok(())
            }
            Pkcs12Command::Pkcs12Read { token_path } => {
                let pw = get_passphrase()?;
                let (_pkey, cert, _chain) = pkcs12::read_pkcs12(&token_path, &pw)?;
                let subject = cert.subject_name();
                let cn = subject
                    .entries_by_nid(openssl::nid::Nid::COMMONNAME)
                    .next()
                    .and_then(|e| e.data().as_utf8().ok())
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                info!("token subject CN = {}", cn);
                Ok(())
            }
        },
        Command::Verify(cmd) => match cmd {
            VerifyCommand::VerifyCert { leaf, root, ignore_time } => {
                let verdict = cert::verify_cert(&leaf, &root, ignore_time)?;
                print_verdict(verdict)
            }
            VerifyCommand::VerifySig { cert, sig, signed_file, digest } => {
                let verdict = sign::verify_sig_files(&cert, &sig, &signed_file, &digest)?;
                print_verdict(verdict)
            }
        },
        Command::Hash { path, digest } => {
            let digest = message_digest(&digest)?;
            let h = hash::hash_file(&path, digest)?;
            println!("{}", hex::encode(h));
            Ok(())
        }
        Command::Wrap(cmd) => run_wrap(cmd),
        Command::Hotplug(HotplugCommand::Run { hosted_mode }) => run_hotplug(hosted_mode),
    }
}

fn print_verdict(verdict: Verdict) -> Result<()> {
    match verdict {
        Verdict::Ok => {
            println!("OK");
            Ok(())
        }
        Verdict::Invalid => {
            println!("INVALID");
            std::process::exit(1);
        }
        Verdict::VerifyError => Err(anyhow::anyhow!("verification could not be completed")),
    }
}

fn message_digest(name: &str) -> Result<openssl::hash::MessageDigest> {
    openssl::hash::MessageDigest::from_name(name)
        .ok_or_else(|| anyhow::anyhow!("unknown digest: {}", name))
}

fn run_batch(spec_dir: &std::path::Path, out_dir: &std::path::Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    for entry in fs::read_dir(spec_dir).with_context(|| format!("reading {}", spec_dir.display()))? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();

        if name.ends_with(KEYSPEC_EXT) {
            let json = fs::read_to_string(&path)?;
            let spec = KeySpec::from_str(&json)?;
            let keypair = keys::make_keypair(spec.padding.into())?;
            let pem = keypair.pkey.private_key_to_pem_pkcs8()?;
            fs::write(out_dir.join(format!("{}.key.pem", spec.label)), pem)?;
            info!("generated key for spec {}", spec.label);
        } else if name.ends_with(CSRSPEC_EXT) {
            let json = fs::read_to_string(&path)?;
            let spec = CsrSpec::from_str(&json)?;
            let key_path = out_dir.join(format!("{}.key.pem", spec.label));
            let req_path = out_dir.join(format!("{}.csr.pem", spec.label));
            csr::create_csr(
                &req_path,
                &key_path,
                None,
                &spec.common_name,
                &spec.uid,
                spec.use_tpm_key,
                spec.padding.into(),
            )?;
            info!("generated CSR for spec {}", spec.label);
        }
    }
    Ok(())
}

fn run_wrap(cmd: WrapCommand) -> Result<()> {
    match cmd {
        WrapCommand::WrapSym { kek_hex, plain_path, out_path } => {
            let kek = hex::decode(kek_hex)?;
            let plain = fs::read(plain_path)?;
            let wrapped = sym::wrap_sym(&kek, &plain)?;
            fs::write(out_path, wrapped)?;
            Ok(())
        }
        WrapCommand::UnwrapSym { kek_hex, wrapped_path, out_path } => {
            let kek = hex::decode(kek_hex)?;
            let wrapped = fs::read(wrapped_path)?;
            let plain = sym::unwrap_sym(&kek, &wrapped)?;
            fs::write(out_path, plain)?;
            Ok(())
        }
        WrapCommand::WrapAsym { recipient_cert, plain_path, out_path } => {
            let cert_pem = fs::read(recipient_cert)?;
            let cert = openssl::x509::X509::from_pem(&cert_pem)?;
            let pubkey = cert.public_key()?;
            let plain = fs::read(plain_path)?;
            let envelope = asym::wrap_key(&pubkey, &plain)?;
            fs::write(out_path, envelope)?;
            Ok(())
        }
        WrapCommand::UnwrapAsym { recipient_key, envelope_path, out_path } => {
            let key_pem = fs::read(recipient_key)?;
            let pkey = openssl::pkey::PKey::private_key_from_pem(&key_pem)?;
            let envelope = fs::read(envelope_path)?;
            let plain = asym::unwrap_key(&pkey, &envelope)?;
            fs::write(out_path, plain)?;
            Ok(())
        }
    }
}

/// Wires the router to a live netlink uevent source and real network
/// helpers. This binary entry point is not exercised by the crate's own
/// test suite: it requires root and a live kernel uevent stream.
fn run_hotplug(hosted_mode: bool) -> Result<()> {
    use cmld_trust::config::HotplugConfig;
    use cmld_trust::hotplug::netdev::NetHelpers;
    use cmld_trust::hotplug::uevent::Uevent;
    use cmld_trust::hotplug::{Router, UeventSource};

    struct NoContainers;
    impl ContainerRegistry for NoContainers {
        fn get(&self, _handle: cmld_trust::container::ContainerHandle) -> Option<&dyn cmld_trust::container::Container> {
            None
        }
        fn c0(&self) -> cmld_trust::container::ContainerHandle {
            cmld_trust::container::ContainerHandle(0)
        }
    }

    struct SysNet;
    impl NetHelpers for SysNet {
        fn get_mac_by_ifname(&self, ifname: &str) -> Option<[u8; 6]> {
            let raw = fs::read_to_string(format!("/sys/class/net/{}/address", ifname)).ok()?;
            let mut mac = [0u8; 6];
            for (i, byte) in raw.trim().split(':').enumerate().take(6) {
                mac[i] = u8::from_str_radix(byte, 16).ok()?;
            }
            Some(mac)
        }
        fn is_wifi(&self, ifname: &str) -> bool {
            std::path::Path::new(&format!("/sys/class/net/{}/wireless", ifname)).exists()
        }
        fn rename_ifi(&self, old: &str, new: &str) -> cmld_trust::error::HotplugResult<()> {
            let status = std::process::Command::new("ip")
                .args(["link", "set", old, "name", new])
                .status()
                .map_err(cmld_trust::error::HotplugError::Io)?;
            if status.success() {
                Ok(())
            } else {
                Err(cmld_trust::error::HotplugError::TransientMoveFailure(format!(
                    "ip link set {} name {} exited with {}",
                    old, new, status
                )))
            }
        }
        fn inject_into_netns(&self, ev: &Uevent, pid: i32, _has_userns: bool) {
            log::trace!("would inject uevent for {:?} into netns of pid {}", ev.ifname, pid);
        }
    }

    struct NotImplementedSource;
    impl UeventSource for NotImplementedSource {
        fn register(&mut self, _poll: &mio::Poll, _token: mio::Token) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "netlink uevent source not wired in this build"))
        }
        fn next_event(&mut self) -> std::io::Result<Option<Uevent>> {
            Ok(None)
        }
    }

    let mut router = Router::new(HotplugConfig { hosted_mode });
    let net = SysNet;
    for ifname in list_physical_netifs() {
        router.seed_physical_netif(ifname);
    }
    router.init(&net)?;
    let containers = NoContainers;
    router.run(NotImplementedSource, &containers, &net)?;
    Ok(())
}

/// Enumerates `/sys/class/net`, skipping loopback and virtual devices
/// (their `/sys/class/net/<if>` symlink target contains "virtual"),
/// mirroring the devpath check `hotplug::netdev::handle_net_add` applies
/// to live uevents.
fn list_physical_netifs() -> Vec<String> {
    let mut names = Vec::new();
    let entries = match fs::read_dir("/sys/class/net") {
        Ok(e) => e,
        Err(e) => {
            log::warn!("could not enumerate /sys/class/net: {}", e);
            return names;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            continue;
        }
        let link_target = fs::read_link(entry.path())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if link_target.contains("virtual") {
            continue;
        }
        names.push(name);
    }
    names
}
