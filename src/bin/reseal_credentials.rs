//! Re-seals stored credentials under a rotated encryption key.
//!
//! Opens every credential with the previous key (`--old-key`) and seals it
//! again with the key currently configured via `AUTOMATIONS_CRYPTO_KEY`.
//! Rows already sealed under the current key are left untouched, so the tool
//! is safe to re-run after a partial rotation.

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use clap::Parser;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use automations::{
    config::ConfigLoader,
    crypto::{CryptoKey, SealedToken, credential_aad},
    db,
    models::credential,
};

#[derive(Parser)]
#[command(
    name = "reseal_credentials",
    about = "Re-seal stored credentials after rotating the crypto key"
)]
struct Args {
    /// Base64-encoded 32-byte key the credentials are currently sealed under
    #[arg(long)]
    old_key: String,

    /// Report what would change without writing anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    let new_key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let new_key = CryptoKey::new(new_key_bytes).context("initializing current crypto key")?;

    let old_key_bytes = general_purpose::STANDARD
        .decode(&args.old_key)
        .context("--old-key is not valid base64")?;
    let old_key = CryptoKey::new(old_key_bytes).context("initializing previous crypto key")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let credentials = credential::Entity::find()
        .all(&db)
        .await
        .context("querying credentials")?;

    let mut resealed = 0usize;
    let mut skipped = 0usize;

    for cred in credentials {
        let credential_id = cred.id;
        let aad = credential_aad(cred.creator_id, &cred.platform);

        // Already sealed under the current key; nothing to do for this row
        let current = SealedToken::from_bytes(cred.access_token_ciphertext.clone())
            .with_context(|| format!("credential {} has malformed ciphertext", credential_id))?;
        if current.open(&new_key, aad.as_bytes()).is_ok() {
            skipped += 1;
            continue;
        }

        let access_plain = current.open(&old_key, aad.as_bytes()).map_err(|err| {
            anyhow!(
                "failed to open access token for {} with the previous key: {}",
                credential_id,
                err
            )
        })?;
        let new_access = SealedToken::seal(&new_key, aad.as_bytes(), &access_plain)
            .map_err(|err| anyhow!("failed to re-seal access token for {}: {}", credential_id, err))?
            .into_bytes();

        let new_refresh = cred
            .refresh_token_ciphertext
            .clone()
            .map(|bytes| -> Result<Vec<u8>> {
                let plain = SealedToken::from_bytes(bytes)
                    .and_then(|sealed| sealed.open(&old_key, aad.as_bytes()))
                    .map_err(|err| {
                        anyhow!(
                            "failed to open refresh token for {} with the previous key: {}",
                            credential_id,
                            err
                        )
                    })?;
                let sealed = SealedToken::seal(&new_key, aad.as_bytes(), &plain).map_err(|err| {
                    anyhow!(
                        "failed to re-seal refresh token for {}: {}",
                        credential_id,
                        err
                    )
                })?;
                Ok(sealed.into_bytes())
            })
            .transpose()?;

        if args.dry_run {
            resealed += 1;
            continue;
        }

        let mut active: credential::ActiveModel = cred.into();
        active.access_token_ciphertext = Set(new_access);
        if let Some(cipher) = new_refresh {
            active.refresh_token_ciphertext = Set(Some(cipher));
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        active
            .update(&db)
            .await
            .with_context(|| format!("updating credential {}", credential_id))?;
        resealed += 1;
    }

    if args.dry_run {
        println!(
            "Dry run: {} credential(s) would be re-sealed, {} already current.",
            resealed, skipped
        );
    } else {
        println!(
            "Re-sealed {} credential(s) under the current key, {} already current.",
            resealed, skipped
        );
    }

    Ok(())
}
