//! Feed message → [`AccountUpdate`].

use acctrail_core::{address::encode_address, update::AccountUpdate};

use crate::{Result, wire::RawAccount};

/// Render the raw identifiers as base-58 and assemble the decoded update.
/// Fails if either identifier is not exactly 32 bytes, or if `slot` does not
/// fit the store's signed 64-bit column.
pub fn decode_account(slot: u64, account: RawAccount) -> Result<AccountUpdate> {
  if i64::try_from(slot).is_err() {
    return Err(acctrail_core::Error::SlotOutOfRange(slot).into());
  }
  Ok(AccountUpdate {
    pubkey: encode_address(&account.pubkey)?,
    owner: encode_address(&account.owner)?,
    lamports: account.lamports,
    slot,
    data: account.data,
    executable: account.executable,
    rent_epoch: account.rent_epoch,
  })
}
