use pretty_assertions::assert_eq;
use svga_proto::cmd;
use svga_proto::otable::{MobEntry, OTableType};
use svga_proto::types::MobFormat;

use super::{fixture, payload, OTABLE_MOB_PPN};
use crate::error::SvgaError;

#[test]
fn mob_create_destroy_round_trip() {
    let mut f = fixture();
    f.set_all_otables();

    f.define_mob(7, 0x200, 1);
    assert_eq!(f.proc.mobs().len(), 1);

    // The OTable entry mirrors the definition.
    let entry: MobEntry = f
        .proc
        .otables()
        .read(f.proc.guest_memory(), OTableType::Mob, 7)
        .unwrap();
    assert_eq!({ entry.size_in_bytes }, 4096);
    assert_eq!({ entry.base }, 0x200);

    let c = cmd::CmdDestroyGbMob { mobid: 7 };
    f.proc
        .process_3d_cmd(0, cmd::DESTROY_GB_MOB, &payload(&c))
        .unwrap();

    assert!(f.proc.mobs().is_empty());
    let entry: MobEntry = f
        .proc
        .otables()
        .read(f.proc.guest_memory(), OTableType::Mob, 7)
        .unwrap();
    assert_eq!({ entry.size_in_bytes }, 0);
    assert_eq!({ entry.base }, 0);
}

#[test]
fn mob_define_without_otable_fails() {
    let mut f = fixture();
    let c = cmd::CmdDefineGbMob64 {
        mobid: 1,
        pt_depth: MobFormat::Range.to_wire(),
        base: 0x200,
        size_in_bytes: 4096,
    };
    let err = f
        .proc
        .process_3d_cmd(0, cmd::DEFINE_GB_MOB64, &payload(&c))
        .unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
    assert!(f.proc.mobs().is_empty());
}

#[test]
fn mob_lookup_promotes_in_lru_order() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_mob(1, 0x200, 1);
    f.define_mob(2, 0x201, 1);
    f.define_mob(3, 0x202, 1);

    // Most recently defined first.
    assert_eq!(f.proc.mobs().ids_by_recency(), vec![3, 2, 1]);

    f.proc.mobs_mut().get(1);
    assert_eq!(f.proc.mobs().ids_by_recency(), vec![1, 3, 2]);
}

#[test]
fn otable_index_out_of_range_is_rejected() {
    let mut f = fixture();
    f.set_all_otables();

    // One 4096-byte page of 16-byte MOB entries: indices 0..255.
    let c = cmd::CmdDefineGbMob64 {
        mobid: 256,
        pt_depth: MobFormat::Range.to_wire(),
        base: 0x200,
        size_in_bytes: 4096,
    };
    let err = f
        .proc
        .process_3d_cmd(0, cmd::DEFINE_GB_MOB64, &payload(&c))
        .unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn otable_grow_preserves_valid_prefix() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_mob(3, 0x200, 1);

    let before: MobEntry = f
        .proc
        .otables()
        .read(f.proc.guest_memory(), OTableType::Mob, 3)
        .unwrap();

    // Grow the MOB table to two pages at a new location, declaring the
    // first page valid.
    let c = cmd::CmdSetOTableBase64 {
        table_type: 0,
        base_address: 0x30,
        size_in_bytes: 8192,
        valid_size_in_bytes: 4096,
        pt_depth: MobFormat::Range.to_wire(),
    };
    f.proc
        .process_3d_cmd(0, cmd::GROW_OTABLE, &payload(&c))
        .unwrap();

    let after: MobEntry = f
        .proc
        .otables()
        .read(f.proc.guest_memory(), OTableType::Mob, 3)
        .unwrap();
    assert_eq!({ before.base }, { after.base });
    assert_eq!({ before.size_in_bytes }, { after.size_in_bytes });

    // The grown table accepts indices past the old limit.
    f.define_mob(300, 0x201, 1);
}

#[test]
fn otable_set_with_valid_larger_than_size_is_rejected() {
    let mut f = fixture();
    let c = cmd::CmdSetOTableBase64 {
        table_type: 0,
        base_address: OTABLE_MOB_PPN,
        size_in_bytes: 4096,
        valid_size_in_bytes: 8192,
        pt_depth: MobFormat::Range.to_wire(),
    };
    let err = f
        .proc
        .process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &payload(&c))
        .unwrap_err();
    assert_eq!(err, SvgaError::InvalidParameter);
}

#[test]
fn otable_destroy_via_zero_size() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_mob(1, 0x200, 1);

    let c = cmd::CmdSetOTableBase64 {
        table_type: 0,
        base_address: 0,
        size_in_bytes: 0,
        valid_size_in_bytes: 0,
        pt_depth: MobFormat::Range.to_wire(),
    };
    f.proc
        .process_3d_cmd(0, cmd::SET_OTABLE_BASE64, &payload(&c))
        .unwrap();

    // Table gone: further MOB definitions fail their OTable write.
    let c = cmd::CmdDefineGbMob64 {
        mobid: 2,
        pt_depth: MobFormat::Range.to_wire(),
        base: 0x201,
        size_in_bytes: 4096,
    };
    assert_eq!(
        f.proc
            .process_3d_cmd(0, cmd::DEFINE_GB_MOB64, &payload(&c))
            .unwrap_err(),
        SvgaError::InvalidParameter
    );
}

#[test]
fn reset_clears_mobs_and_otables() {
    let mut f = fixture();
    f.set_all_otables();
    f.define_mob(1, 0x200, 1);
    f.define_mob(2, 0x201, 1);

    f.proc.reset();
    assert!(f.proc.mobs().is_empty());
    assert!(!f.proc.otables().table(OTableType::Mob).is_created());
}
