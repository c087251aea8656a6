//! Vault and ERC20 contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The vault is
//! owner-privileged: only the hot wallet may call release/refund/withdraw.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Escrow vault contract interface
    #[sol(rpc)]
    contract EscrowVault {
        /// Release escrowed tokens to the buyer (owner only)
        function release(address to, uint256 amount) external;

        /// Refund escrowed tokens to the seller (owner only)
        function refund(address to, uint256 amount) external;

        /// Sweep an arbitrary ERC20 out of the vault (owner only)
        function withdrawToken(address token, address to) external;

        /// Vault owner (must match the hot wallet)
        function owner() external view returns (address);

        /// Escrow fee in basis points
        function feePercent() external view returns (uint256);

        function feeWallet1() external view returns (address);
        function feeWallet2() external view returns (address);
        function feeWallet3() external view returns (address);

        /// Fees accrued in the vault, in token base units
        function accumulatedFees() external view returns (uint256);
    }

    /// Standard ERC20 interface
    #[sol(rpc)]
    contract ERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}
