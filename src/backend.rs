//! 計算バックエンドの選択
//!
//! 既定はCPU (NdArray)。`wgpu` フィーチャー有効時はWGPUを使用します。

use anyhow::Result;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

use crate::model::DeviceType;

#[cfg(not(feature = "wgpu"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(feature = "wgpu")]
pub type DefaultBackend = burn::backend::Wgpu;

/// 学習用（自動微分付き）バックエンド
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub type Device = <DefaultBackend as Backend>::Device;

/// 現在のビルドで使えるデバイスの種類
pub fn compiled_device_type() -> DeviceType {
    if cfg!(feature = "wgpu") {
        DeviceType::Wgpu
    } else {
        DeviceType::Cpu
    }
}

/// 設定されたデバイスを取得
///
/// ビルドに含まれないバックエンドが指定された場合はエラー。
pub fn default_device(requested: DeviceType) -> Result<Device> {
    let compiled = compiled_device_type();
    anyhow::ensure!(
        requested == compiled,
        "{} はこのビルドでは使用できません（利用可能: {}）",
        requested,
        compiled
    );
    Ok(Device::default())
}

pub fn backend_name() -> String {
    compiled_device_type().to_string()
}
