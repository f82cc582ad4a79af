use serde::{Deserialize, Serialize};

/// The closed set of vehicle types providers can report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub enum VehicleType {
    #[default]
    Unknown,
    Tram,
    Bus,
    TrolleyBus,
    Subway,
    Metro,
    TrainInterurban,
    RegionalTrain,
    RegionalExpressTrain,
    InterregionalTrain,
    IntercityTrain,
    HighSpeedTrain,
    Ferry,
    Ship,
    Plane,
    Feet,
}

impl VehicleType {
    pub const ALL: [VehicleType; 16] = [
        VehicleType::Unknown,
        VehicleType::Tram,
        VehicleType::Bus,
        VehicleType::TrolleyBus,
        VehicleType::Subway,
        VehicleType::Metro,
        VehicleType::TrainInterurban,
        VehicleType::RegionalTrain,
        VehicleType::RegionalExpressTrain,
        VehicleType::InterregionalTrain,
        VehicleType::IntercityTrain,
        VehicleType::HighSpeedTrain,
        VehicleType::Ferry,
        VehicleType::Ship,
        VehicleType::Plane,
        VehicleType::Feet,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            VehicleType::Unknown => "Unknown",
            VehicleType::Tram => "Tram",
            VehicleType::Bus => "Bus",
            VehicleType::TrolleyBus => "TrolleyBus",
            VehicleType::Subway => "Subway",
            VehicleType::Metro => "Metro",
            VehicleType::TrainInterurban => "TrainInterurban",
            VehicleType::RegionalTrain => "RegionalTrain",
            VehicleType::RegionalExpressTrain => "RegionalExpressTrain",
            VehicleType::InterregionalTrain => "InterregionalTrain",
            VehicleType::IntercityTrain => "IntercityTrain",
            VehicleType::HighSpeedTrain => "HighSpeedTrain",
            VehicleType::Ferry => "Ferry",
            VehicleType::Ship => "Ship",
            VehicleType::Plane => "Plane",
            VehicleType::Feet => "Feet",
        }
    }

    pub fn id(&self) -> i64 {
        Self::ALL.iter().position(|t| t == self).unwrap_or(0) as i64
    }

    pub fn from_id(id: i64) -> Option<Self> {
        usize::try_from(id).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Resolves a vehicle type name case-insensitively, including the common
    /// abbreviations used by providers.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(|c| c.to_lowercase())
            .collect();
        let vehicle = match normalized.as_str() {
            "unknown" => VehicleType::Unknown,
            "tram" | "strassenbahn" | "straßenbahn" => VehicleType::Tram,
            "bus" => VehicleType::Bus,
            "trolleybus" | "tro" => VehicleType::TrolleyBus,
            "subway" | "ubahn" | "u-bahn" => VehicleType::Subway,
            "metro" => VehicleType::Metro,
            "traininterurban" | "interurbantrain" | "sbahn" | "s-bahn" => {
                VehicleType::TrainInterurban
            }
            "regionaltrain" | "regional" | "rb" => VehicleType::RegionalTrain,
            "regionalexpresstrain" | "regionalexpress" | "re" => {
                VehicleType::RegionalExpressTrain
            }
            "interregionaltrain" | "interregional" | "ir" => VehicleType::InterregionalTrain,
            "intercitytrain" | "intercity" | "ic" => VehicleType::IntercityTrain,
            "highspeedtrain" | "highspeed" | "ice" => VehicleType::HighSpeedTrain,
            "ferry" => VehicleType::Ferry,
            "ship" => VehicleType::Ship,
            "plane" => VehicleType::Plane,
            "feet" | "byfoot" => VehicleType::Feet,
            _ => return None,
        };
        Some(vehicle)
    }
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_case_insensitively() {
        assert_eq!(VehicleType::from_name("Bus"), Some(VehicleType::Bus));
        assert_eq!(VehicleType::from_name("ICE"), Some(VehicleType::HighSpeedTrain));
        assert_eq!(
            VehicleType::from_name("InterurbanTrain"),
            Some(VehicleType::TrainInterurban)
        );
        assert_eq!(VehicleType::from_name("hovercraft"), None);
    }

    #[test]
    fn ids_round_trip() {
        for vehicle in VehicleType::ALL {
            assert_eq!(VehicleType::from_id(vehicle.id()), Some(vehicle));
        }
        assert_eq!(VehicleType::from_id(99), None);
    }
}
