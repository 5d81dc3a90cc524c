//! Solidity interface definitions for on-chain interactions.
//!
//! Contains the minimal ABI surface the facilitator consumes:
//! - [`IDeferredPaymentEscrow`] — the escrow contract: collect, deposit,
//!   flush, and the read methods backing verification
//! - [`IERC20Permit`] — EIP-2612 subset used to submit permits and read
//!   allowances and permit nonces
//!
//! Only the functions actually called are declared. The two
//! `flushWithAuthorization` overloads differ by authorization tuple:
//! the targeted variant is `_0`, the flush-all variant is `_1`.

use alloy_sol_types::sol;

use crate::deferred::types as wire;

sol! {
    /// Escrow contract for deferred x402 payments.
    ///
    /// Holds buyer deposits scoped to (buyer, seller, asset) and pays a
    /// seller up to a voucher's `valueAggregate` minus previously
    /// collected amounts when given a buyer-signed voucher.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IDeferredPaymentEscrow {
        struct Voucher {
            bytes32 id;
            address buyer;
            address seller;
            uint256 valueAggregate;
            address asset;
            uint64 timestamp;
            uint256 nonce;
            address escrow;
            uint256 chainId;
            uint64 expiry;
        }

        struct DepositAuthorization {
            address buyer;
            address seller;
            address asset;
            uint256 amount;
            bytes32 nonce;
            uint64 expiry;
        }

        struct FlushAuthorization {
            address buyer;
            address seller;
            address asset;
            bytes32 nonce;
            uint64 expiry;
        }

        struct FlushAllAuthorization {
            address buyer;
            bytes32 nonce;
            uint64 expiry;
        }

        struct Account {
            uint256 balance;
            uint256 thawingAmount;
            uint256 thawEndTime;
        }

        function getAccount(address buyer, address seller, address asset)
            external view returns (Account memory account);

        function getAccountDetails(
            address buyer,
            address seller,
            address asset,
            bytes32[] calldata voucherIds,
            uint256[] calldata voucherValues
        ) external view returns (uint256 balance, uint256 allowance, uint256 nonce);

        function getOutstandingAndCollectableAmount(Voucher calldata voucher)
            external view returns (uint256 outstanding, uint256 collectable);

        function getVerificationData(Voucher calldata voucher, bytes32 depositNonce)
            external view returns (
                uint256 voucherOutstanding,
                uint256 voucherCollectable,
                uint256 availableBalance,
                uint256 allowance,
                uint256 nonce,
                bool isDepositNonceUsed
            );

        function collect(Voucher calldata voucher, bytes calldata signature) external;

        function depositWithAuthorization(
            DepositAuthorization calldata authorization,
            bytes calldata signature
        ) external;

        function flushWithAuthorization(
            FlushAuthorization calldata authorization,
            bytes calldata signature
        ) external;

        function flushWithAuthorization(
            FlushAllAuthorization calldata authorization,
            bytes calldata signature
        ) external;

        event VoucherCollected(
            bytes32 indexed id,
            address indexed buyer,
            address indexed seller,
            uint256 nonce,
            uint256 amount
        );
    }
}

sol! {
    /// EIP-2612 subset of an ERC-20 token contract.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20Permit {
        function permit(
            address owner,
            address spender,
            uint256 value,
            uint256 deadline,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function allowance(address owner, address spender) external view returns (uint256);
        function nonces(address owner) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }
}

impl From<&wire::Voucher> for IDeferredPaymentEscrow::Voucher {
    fn from(voucher: &wire::Voucher) -> Self {
        Self {
            id: voucher.id,
            buyer: voucher.buyer.into(),
            seller: voucher.seller.into(),
            valueAggregate: voucher.value_aggregate.into(),
            asset: voucher.asset.into(),
            timestamp: voucher.timestamp.as_secs(),
            nonce: alloy_primitives::U256::from(voucher.nonce.inner()),
            escrow: voucher.escrow.into(),
            chainId: alloy_primitives::U256::from(voucher.chain_id),
            expiry: voucher.expiry.as_secs(),
        }
    }
}

impl From<&wire::DepositAuthorization> for IDeferredPaymentEscrow::DepositAuthorization {
    fn from(auth: &wire::DepositAuthorization) -> Self {
        Self {
            buyer: auth.buyer.into(),
            seller: auth.seller.into(),
            asset: auth.asset.into(),
            amount: auth.amount.into(),
            nonce: auth.nonce,
            expiry: auth.expiry.as_secs(),
        }
    }
}
