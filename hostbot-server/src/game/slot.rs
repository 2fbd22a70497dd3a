// slot.rs -- slot table (spec.md ss3 SlotTemplate/Slot).
// Converted from: myq2-original has no analog; grounded on the teacher's
// terse plain-data-struct style (see server.rs's Client/Challenge structs)
// applied to the wire-shaped Slot record described in spec.md ss6.

pub const OBSERVER_TEAM: u8 = 12;
pub const OBSERVER_COLOR: u8 = 12;
pub const DOWNLOAD_PLACEHOLDER: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotStatus {
    Open = 0,
    Closed = 1,
    Occupied = 2,
}

bitflags::bitflags! {
    /// Race bitset: {human, orc, nightelf, undead, random, selectable, fixed}.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RaceFlags: u8 {
        const HUMAN      = 0b0000_0001;
        const ORC        = 0b0000_0010;
        const NIGHT_ELF  = 0b0000_0100;
        const UNDEAD     = 0b0000_1000;
        const RANDOM     = 0b0001_0000;
        const SELECTABLE = 0b0010_0000;
        const FIXED      = 0b0100_0000;
    }
}

/// One slot as it exists on the wire: 9 bytes (spec.md ss6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub uid: u8,
    pub download_percent: u8,
    pub status: SlotStatus,
    pub is_computer: bool,
    pub team: u8,
    pub color: u8,
    pub race: RaceFlags,
    pub ai_difficulty: u8,
    pub handicap: u8,
}

impl Slot {
    pub fn open(team: u8, color: u8, race: RaceFlags) -> Self {
        Slot {
            uid: 0,
            download_percent: DOWNLOAD_PLACEHOLDER,
            status: SlotStatus::Open,
            is_computer: false,
            team,
            color,
            race,
            ai_difficulty: 0,
            handicap: 100,
        }
    }

    pub fn observer() -> Self {
        Slot::open(OBSERVER_TEAM, OBSERVER_COLOR, RaceFlags::RANDOM | RaceFlags::SELECTABLE)
    }

    pub fn is_observer(&self) -> bool {
        self.team == OBSERVER_TEAM
    }

    pub fn is_occupied(&self) -> bool {
        self.status == SlotStatus::Occupied
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.uid);
        out.push(self.download_percent);
        out.push(self.status as u8);
        out.push(self.is_computer as u8);
        out.push(self.team);
        out.push(self.color);
        out.push(self.race.bits());
        out.push(self.ai_difficulty);
        out.push(self.handicap);
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 9 {
            return None;
        }
        let status = match bytes[2] {
            0 => SlotStatus::Open,
            1 => SlotStatus::Closed,
            2 => SlotStatus::Occupied,
            _ => return None,
        };
        Some(Slot {
            uid: bytes[0],
            download_percent: bytes[1],
            status,
            is_computer: bytes[3] != 0,
            team: bytes[4],
            color: bytes[5],
            race: RaceFlags::from_bits_truncate(bytes[6]),
            ai_difficulty: bytes[7],
            handicap: bytes[8],
        })
    }
}

/// Game flags bit field (speed/visibility/observer mode/team constraints).
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GameFlags: u32 {
        const TEAMS_TOGETHER   = 1 << 0;
        const FIXED_TEAMS      = 1 << 1;
        const FULL_SHARED_UNIT_CONTROL = 1 << 2;
        const RANDOM_HERO      = 1 << 3;
        const RANDOM_RACES     = 1 << 4;
        const REFEREES         = 1 << 5;
        const CUSTOM_FORCES    = 1 << 6;
        const FIXED_PLAYER_SETTINGS = 1 << 7;
    }
}

/// The full ordered slot layout, length 2..=24 (spec.md ss3).
#[derive(Debug, Clone)]
pub struct SlotTemplate {
    pub slots: Vec<Slot>,
    pub num_teams: u8,
}

impl SlotTemplate {
    pub fn new(slots: Vec<Slot>, num_teams: u8) -> Self {
        SlotTemplate { slots, num_teams }
    }

    /// P1: colors unique among occupied/closed non-observer slots; every
    /// non-observer slot's team < numTeams.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen_colors = std::collections::HashSet::new();
        for slot in &self.slots {
            if slot.is_observer() {
                continue;
            }
            if slot.team >= self.num_teams {
                return Err(format!(
                    "slot uid={} has team {} >= numTeams {}",
                    slot.uid, slot.team, self.num_teams
                ));
            }
            if matches!(slot.status, SlotStatus::Occupied | SlotStatus::Closed)
                && !seen_colors.insert(slot.color)
            {
                return Err(format!("duplicate color {} among occupied slots", slot.color));
            }
        }
        Ok(())
    }

    pub fn first_open_player_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.status == SlotStatus::Open && !s.is_observer())
    }

    pub fn first_open_observer_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.status == SlotStatus::Open && s.is_observer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn melee_template() -> SlotTemplate {
        SlotTemplate::new(
            vec![
                Slot::open(0, 0, RaceFlags::RANDOM | RaceFlags::SELECTABLE),
                Slot::open(1, 1, RaceFlags::RANDOM | RaceFlags::SELECTABLE),
            ],
            2,
        )
    }

    #[test]
    fn slot_roundtrips_through_wire_encoding() {
        let mut s = Slot::open(0, 0, RaceFlags::HUMAN);
        s.uid = 3;
        s.status = SlotStatus::Occupied;
        let mut bytes = Vec::new();
        s.encode(&mut bytes);
        assert_eq!(bytes.len(), 9);
        let decoded = Slot::decode(&bytes).unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn duplicate_color_among_occupied_slots_violates_p1() {
        let mut t = melee_template();
        t.slots[0].status = SlotStatus::Occupied;
        t.slots[0].uid = 1;
        t.slots[1].status = SlotStatus::Occupied;
        t.slots[1].uid = 2;
        t.slots[1].color = 0; // collides with slot 0's color
        assert!(t.check_invariants().is_err());
    }

    #[test]
    fn valid_melee_template_passes_invariants() {
        let mut t = melee_template();
        t.slots[0].status = SlotStatus::Occupied;
        t.slots[0].uid = 1;
        assert!(t.check_invariants().is_ok());
    }

    #[test]
    fn observer_slots_are_exempt_from_team_bound() {
        let mut t = melee_template();
        t.slots.push(Slot::observer());
        t.slots[2].status = SlotStatus::Occupied;
        t.slots[2].uid = 9;
        assert!(t.check_invariants().is_ok());
    }
}
