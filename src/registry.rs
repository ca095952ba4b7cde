// 该文件是 Qinghong （青红） 项目的一部分。
// src/registry.rs - 类别表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;

/// 一个类别的名称与绘制颜色
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
  pub name: String,
  pub color: [u8; 3],
}

/// 类别 ID 到名称/样式的静态映射。启动时固定，循环期间只读。
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
  classes: BTreeMap<u32, ClassEntry>,
}

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("类别条目无效: {0}")]
  BadEntry(String),
}

impl ClassRegistry {
  pub fn empty() -> Self {
    Self::default()
  }

  /// 内置的红/绿苹果两类
  pub fn red_green() -> Self {
    let mut registry = Self::empty();
    registry.insert(1, "red", [0xff, 0x00, 0x00]);
    registry.insert(2, "green", [0x00, 0xba, 0x28]);
    registry
  }

  pub fn insert(&mut self, id: u32, name: &str, color: [u8; 3]) {
    self.classes.insert(
      id,
      ClassEntry {
        name: name.to_string(),
        color,
      },
    );
  }

  pub fn get(&self, id: u32) -> Option<&ClassEntry> {
    self.classes.get(&id)
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }

  /// 从 JSON 文件加载类别表。格式:
  /// `{"1": {"name": "red", "color": "#ff0000"}, ...}`
  pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;

    let object = value
      .as_object()
      .ok_or_else(|| RegistryError::BadEntry("顶层应为对象".to_string()))?;

    let mut registry = Self::empty();
    for (key, entry) in object {
      let id: u32 = key
        .parse()
        .map_err(|_| RegistryError::BadEntry(format!("类别 ID 无效: {}", key)))?;

      let name = entry
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RegistryError::BadEntry(format!("类别 {} 缺少名称", key)))?;

      let color = entry
        .get("color")
        .and_then(|v| v.as_str())
        .and_then(parse_hex_color)
        .ok_or_else(|| RegistryError::BadEntry(format!("类别 {} 颜色无效", key)))?;

      registry.insert(id, name, color);
    }

    Ok(registry)
  }
}

fn parse_hex_color(text: &str) -> Option<[u8; 3]> {
  let hex = text.strip_prefix('#')?;
  // 非 ASCII 输入先拒绝，固定字节切片才不会落在字符中间
  if hex.len() != 6 || !hex.is_ascii() {
    return None;
  }

  let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
  let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
  let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
  Some([r, g, b])
}
