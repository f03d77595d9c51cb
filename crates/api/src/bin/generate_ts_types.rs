// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

// Allowed: This is a CLI code generation tool, not server code.
// Using println! for progress output is appropriate here.
#![allow(clippy::disallowed_macros)]

use std::fs;
use std::path::Path;
use ts_rs::TS;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let declarations = [
        // callrelay-core types
        format!("// callrelay-core\nexport {}", callrelay_core::CallRecord::decl()),
        // callrelay-api types
        format!("\n// callrelay-api\nexport {}", callrelay_api::DeliveryMode::decl()),
        format!("export {}", callrelay_api::NewCall::decl()),
        format!("export {}", callrelay_api::ServerEvent::decl()),
        format!("export {}", callrelay_api::RecordingEntry::decl()),
    ];

    let output = declarations.join("\n\n");
    let content = format!("// This file is auto-generated. Do not edit it manually.\n\n{output}");

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(|parent| parent.parent())
        .ok_or("Failed to find workspace root from CARGO_MANIFEST_DIR")?;
    let output_path = workspace_root.join("web/src/types/generated/api-types.ts");

    println!("Writing TypeScript bindings to: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output_path, content)?;

    println!("✅ TypeScript bindings generated successfully.");

    Ok(())
}
