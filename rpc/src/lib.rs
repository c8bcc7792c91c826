//! A thin read/submit JSON-RPC surface over the core ledger and block
//! processor, grounded on `jsonrpsee`'s `RpcModule` builder pattern. The
//! original's sprawling `rpc_handler` dispatch table (account management,
//! bootstrap control, wallet actions) is out of scope here — this exposes
//! only the read-only queries and the single write path (`process`) a
//! demonstration node needs.

use crossbeam_channel::Sender;
use jsonrpsee::core::RpcResult;
use jsonrpsee::types::error::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use talus_core::blocks::Block;
use talus_core::config::NetworkParams;
use talus_core::ledger::Ledger;
use talus_core::numbers::{Account, Amount};
use talus_core::store::Store;

/// Everything the RPC handlers need, held behind `Arc` so the module can
/// be cloned cheaply into each `jsonrpsee` call closure.
pub struct RpcContext {
    pub store: Arc<Store>,
    pub params: Arc<NetworkParams>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountInfoResponse {
    pub frontier: String,
    pub open_block: String,
    pub representative_block: String,
    pub balance: String,
    pub modified_timestamp: u64,
    pub block_count: u64,
    pub confirmation_height: u64,
}

fn account_not_found() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, "account not found", None::<()>)
}

fn bad_account(err: impl std::fmt::Display) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32001, format!("invalid account: {err}"), None::<()>)
}

/// Builds the module. `process` (publish) hands the decoded block to
/// `submit`, a channel read by the caller's own block-processor worker
/// loop — keeping this module free of the block processor's borrowed
/// `Ledger`/`Store` lifetimes.
pub fn build_rpc_module(ctx: Arc<RpcContext>, submit: Sender<Block>) -> RpcModule<()> {
    let mut module = RpcModule::new(());

    {
        let ctx = ctx.clone();
        module
            .register_method("account_info", move |params, _| -> RpcResult<AccountInfoResponse> {
                let address: String = params.one()?;
                let account = Account::from_address(&address, &["talus_", "xrb_"]).map_err(bad_account)?;
                let txn = ctx.store.tx_begin_read();
                let info = ctx.store.account_get(&txn, &account).ok_or_else(account_not_found)?;
                Ok(AccountInfoResponse {
                    frontier: hex::encode(info.head.0),
                    open_block: hex::encode(info.open_block.0),
                    representative_block: hex::encode(info.rep_block.0),
                    balance: info.balance.0.to_string(),
                    modified_timestamp: info.modified,
                    block_count: info.block_count,
                    confirmation_height: info.confirmation_height,
                })
            })
            .expect("method name is unique");
    }

    {
        let ctx = ctx.clone();
        module
            .register_method("account_balance", move |params, _| -> RpcResult<String> {
                let address: String = params.one()?;
                let account = Account::from_address(&address, &["talus_", "xrb_"]).map_err(bad_account)?;
                let ledger = Ledger::new(&ctx.store, &ctx.params);
                let txn = ctx.store.tx_begin_read();
                let balance: Amount = ledger.balance(&txn, &account);
                Ok(balance.0.to_string())
            })
            .expect("method name is unique");
    }

    module
        .register_method("version", |_, _| -> RpcResult<&'static str> { Ok(env!("CARGO_PKG_VERSION")) })
        .expect("method name is unique");

    {
        module
            .register_method("process", move |params, _| -> RpcResult<&'static str> {
                let block_hex: String = params.one()?;
                let bytes = hex::decode(&block_hex)
                    .map_err(|e| ErrorObjectOwned::owned(-32002, format!("invalid hex: {e}"), None::<()>))?;
                let block: Block = bincode::deserialize(&bytes)
                    .map_err(|e| ErrorObjectOwned::owned(-32003, format!("invalid block encoding: {e}"), None::<()>))?;
                submit
                    .send(block)
                    .map_err(|_| ErrorObjectOwned::owned(-32004, "block processor is no longer listening", None::<()>))?;
                Ok("queued")
            })
            .expect("method name is unique");
    }

    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_method_reports_crate_version() {
        let store = Arc::new(Store::new());
        let params = Arc::new(NetworkParams::test());
        let ctx = Arc::new(RpcContext { store, params });
        let (submit, _receiver) = crossbeam_channel::unbounded();
        let module = build_rpc_module(ctx, submit);
        let response: String = module.call("version", jsonrpsee::core::params::ArrayParams::new()).await.unwrap();
        assert_eq!(response, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn account_info_reports_not_found_for_unopened_account() {
        let store = Arc::new(Store::new());
        let params = Arc::new(NetworkParams::test());
        let ctx = Arc::new(RpcContext { store, params });
        let (submit, _receiver) = crossbeam_channel::unbounded();
        let module = build_rpc_module(ctx, submit);
        let mut call_params = jsonrpsee::core::params::ArrayParams::new();
        call_params.insert("talus_1111111111111111111111111111111111111111111111111111hifc8npp").unwrap();
        let result: Result<AccountInfoResponse, _> = module.call("account_info", call_params).await;
        assert!(result.is_err());
    }
}
