use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use nlfbx_lib::{binfbx::BinFbx, binskel::BinSkeleton, rbf::Rbf};
use nlfbx_model::{skeleton::Skeleton, solver};

/// Print the contents of BinFBX, BinSkeleton, and RBF files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to inspect, selected by extension.
    input: String,

    /// Companion .binskeleton used to resolve RBF bone hashes.
    #[arg(long)]
    skeleton: Option<String>,
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();
    let input = PathBuf::from(&cli.input);
    let extension = input.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension {
        "binfbx" | "mesh" => dump_binfbx(&input),
        "binskeleton" => dump_binskeleton(&input),
        "rbf" => dump_rbf(&input, cli.skeleton.as_deref()),
        _ => bail!("unrecognized extension {extension:?}"),
    }
}

fn dump_binfbx(path: &Path) -> Result<()> {
    let binfbx = BinFbx::from_file(path).with_context(|| format!("failed to read {path:?}"))?;

    println!(
        "buffers: {} + {} bytes, {} indices ({} bytes each)",
        binfbx.vertex_buffer0.len(),
        binfbx.vertex_buffer1.len(),
        binfbx.index_buffer.len() / binfbx.index_size.max(1) as usize,
        binfbx.index_size
    );

    println!("joints: {}", binfbx.joints.len());
    for joint in &binfbx.joints {
        let parent = usize::try_from(joint.parent)
            .ok()
            .and_then(|i| binfbx.joints.get(i))
            .map(|p| p.name.as_str())
            .unwrap_or("-");
        println!("  {} (parent {parent})", joint.name);
    }

    println!("materials: {}", binfbx.materials.len());
    for material in &binfbx.materials {
        println!(
            "  {} [{}] {}",
            material.name, material.type_name, material.path
        );
        for uniform in &material.uniforms {
            println!("    {} = {:?}", uniform.name, uniform.value);
        }
    }

    for (group, meshes) in binfbx.groups.iter().enumerate() {
        println!("group {group}: {} meshes", meshes.meshes.len());
        for (i, mesh) in meshes.meshes.iter().enumerate() {
            println!(
                "  {}: {} vertices, {} triangles, {} attributes",
                nlfbx_model::mesh_object_name(group, mesh.lod, i),
                mesh.vertex_count,
                mesh.triangle_count,
                mesh.attributes.len()
            );
        }
    }

    println!(
        "materials maps: {} primary, {} alternates, {} secondary",
        binfbx.material_maps.primary.len(),
        binfbx.material_maps.alternates.len(),
        binfbx.material_maps.secondary.len()
    );
    Ok(())
}

fn dump_binskeleton(path: &Path) -> Result<()> {
    let skeleton =
        BinSkeleton::from_file(path).with_context(|| format!("failed to read {path:?}"))?;

    println!("bones: {}", skeleton.bones.len());
    for bone in &skeleton.bones {
        let parent = usize::try_from(bone.parent)
            .ok()
            .and_then(|i| skeleton.bones.get(i))
            .map(|p| p.name.as_str())
            .unwrap_or("-");
        println!(
            "  {} (parent {parent}, id {:#x}) rotation {:?} translation {:?}",
            bone.name, bone.id, bone.rotation, bone.translation
        );
    }
    Ok(())
}

fn dump_rbf(path: &Path, skeleton: Option<&str>) -> Result<()> {
    let rbf = Rbf::from_file(path).with_context(|| format!("failed to read {path:?}"))?;
    let names = match skeleton {
        Some(skeleton) => {
            let binskel = BinSkeleton::from_file(skeleton)
                .with_context(|| format!("failed to read {skeleton:?}"))?;
            Skeleton::from_binskeleton(&binskel)?.bone_names()
        }
        None => Vec::new(),
    };

    let inputs = solver::resolve_bone_refs(&rbf.input_hashes, &names);
    let outputs = solver::resolve_bone_refs(&rbf.output_hashes, &names);

    println!(
        "version {}, {} sections, {} declared entries",
        rbf.version,
        rbf.sections.len(),
        rbf.declared_entry_count
    );
    for (i, section) in rbf.sections.iter().enumerate() {
        println!(
            "section {i}: dimension {}, {} entries, {} bytes of solver data",
            section.dimension,
            section.entries.len(),
            section.solver_data.len()
        );
        for entry in &section.entries {
            let input = inputs
                .get(entry.bone_index as usize)
                .map(|r| r.label())
                .unwrap_or_else(|| format!("#{}", entry.bone_index));
            let driven: Vec<String> = entry
                .outputs
                .iter()
                .map(|o| {
                    outputs
                        .get(*o as usize)
                        .map(|r| r.label())
                        .unwrap_or_else(|| format!("#{o}"))
                })
                .collect();
            println!(
                "  {input}[{}] drives {}",
                entry.quat_component,
                driven.join(", ")
            );
        }
    }
    Ok(())
}
