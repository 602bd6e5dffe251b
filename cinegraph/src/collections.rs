//! Vertex and edge collection kinds of the media graph.

use std::fmt;

macro_rules! collection_kinds {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

collection_kinds! {
    /// Document collections. Declaration order is the satellite flush order.
    pub enum VertexKind {
        Movie => "Movie",
        Show => "Show",
        Person => "Person",
        Genre => "Genre",
        Keyword => "Keyword",
        Trope => "Trope",
        DnaTag => "DnaTag",
        MovieSeries => "MovieSeries",
        ProductionCompany => "ProductionCompany",
        Network => "Network",
        Translation => "Translation",
        Image => "Image",
        Video => "Video",
        AlternativeTitle => "AlternativeTitle",
        ReleaseEvent => "ReleaseEvent",
        AgeClassification => "AgeClassification",
        Country => "Country",
        Language => "Language",
        StreamingService => "StreamingService",
        StreamingAvailability => "StreamingAvailability",
        Season => "Season",
        Score => "Score",
        User => "User",
        UserFavorite => "UserFavorite",
        UserScore => "UserScore",
        UserWishlist => "UserWishlist",
        UserWatchHistory => "UserWatchHistory",
    }
}

collection_kinds! {
    /// Edge collections.
    pub enum EdgeKind {
        HasGenre => "has_genre",
        HasKeyword => "has_keyword",
        HasTrope => "has_trope",
        HasDnaTag => "has_dna_tag",
        HasImage => "has_image",
        HasVideo => "has_video",
        HasAlternativeTitle => "has_alternative_title",
        HasTranslation => "has_translation",
        TranslationInLanguage => "translation_in_language",
        HasReleaseEvent => "has_release_event",
        ReleasedInCountry => "released_in_country",
        HasAgeClassification => "has_age_classification",
        ClassifiedInCountry => "classified_in_country",
        BelongsToMovieSeries => "belongs_to_movie_series",
        ProducedBy => "produced_by",
        NetworkFor => "network_for",
        AppearedIn => "appeared_in",
        WorkedOn => "worked_on",
        OriginatesFromCountry => "originates_from_country",
        HasSpokenLanguage => "has_spoken_language",
        HasOriginalLanguage => "has_original_language",
        HasStreamingAvailability => "has_streaming_availability",
        AvailableOn => "available_on",
        AvailableInCountry => "available_in_country",
        HasSeason => "has_season",
        HasScore => "has_score",
        TmdbRecommends => "tmdb_recommends",
        TmdbSimilarTo => "tmdb_similar_to",
        FavoritedBy => "favorited_by",
        ScoredBy => "scored_by",
        WishlistedBy => "wishlisted_by",
        WatchedBy => "watched_by",
    }
}

const PRIMARIES: &[VertexKind] = &[VertexKind::Movie, VertexKind::Show];

impl VertexKind {
    pub fn is_primary(self) -> bool {
        PRIMARIES.contains(&self)
    }

    /// Satellites belong to exactly one primary and carry its key in
    /// `parent_key`.
    pub fn is_satellite(self) -> bool {
        matches!(
            self,
            VertexKind::Translation
                | VertexKind::Image
                | VertexKind::Video
                | VertexKind::AlternativeTitle
                | VertexKind::ReleaseEvent
                | VertexKind::AgeClassification
                | VertexKind::StreamingAvailability
                | VertexKind::Season
                | VertexKind::Score
        )
    }
}

impl EdgeKind {
    /// Allowed `(from, to)` collections, as declared in the graph.
    pub fn endpoints(self) -> (&'static [VertexKind], &'static [VertexKind]) {
        use VertexKind as V;
        match self {
            EdgeKind::HasGenre => (PRIMARIES, &[V::Genre]),
            EdgeKind::HasKeyword => (PRIMARIES, &[V::Keyword]),
            EdgeKind::HasTrope => (PRIMARIES, &[V::Trope]),
            EdgeKind::HasDnaTag => (PRIMARIES, &[V::DnaTag]),
            EdgeKind::HasImage => (PRIMARIES, &[V::Image]),
            EdgeKind::HasVideo => (PRIMARIES, &[V::Video]),
            EdgeKind::HasAlternativeTitle => (PRIMARIES, &[V::AlternativeTitle]),
            EdgeKind::HasTranslation => (PRIMARIES, &[V::Translation]),
            EdgeKind::TranslationInLanguage => (&[V::Translation], &[V::Language]),
            EdgeKind::HasReleaseEvent => (PRIMARIES, &[V::ReleaseEvent]),
            EdgeKind::ReleasedInCountry => (&[V::ReleaseEvent], &[V::Country]),
            EdgeKind::HasAgeClassification => (&[V::ReleaseEvent], &[V::AgeClassification]),
            EdgeKind::ClassifiedInCountry => (&[V::AgeClassification], &[V::Country]),
            EdgeKind::BelongsToMovieSeries => (&[V::Movie], &[V::MovieSeries]),
            EdgeKind::ProducedBy => (PRIMARIES, &[V::ProductionCompany]),
            EdgeKind::NetworkFor => (&[V::Network], &[V::Show]),
            EdgeKind::AppearedIn | EdgeKind::WorkedOn => (&[V::Person], PRIMARIES),
            EdgeKind::OriginatesFromCountry => (PRIMARIES, &[V::Country]),
            EdgeKind::HasSpokenLanguage | EdgeKind::HasOriginalLanguage => {
                (PRIMARIES, &[V::Language])
            }
            EdgeKind::HasStreamingAvailability => (PRIMARIES, &[V::StreamingAvailability]),
            EdgeKind::AvailableOn => (&[V::StreamingAvailability], &[V::StreamingService]),
            EdgeKind::AvailableInCountry => (&[V::StreamingAvailability], &[V::Country]),
            EdgeKind::HasSeason => (&[V::Show], &[V::Season]),
            EdgeKind::HasScore => (PRIMARIES, &[V::Score]),
            EdgeKind::TmdbRecommends | EdgeKind::TmdbSimilarTo => (PRIMARIES, PRIMARIES),
            EdgeKind::FavoritedBy
            | EdgeKind::ScoredBy
            | EdgeKind::WishlistedBy
            | EdgeKind::WatchedBy => (PRIMARIES, &[V::User]),
        }
    }

    /// Edges between two primary vertices. Their targets may not have been
    /// imported yet when the edge is produced.
    pub fn is_self_edge(self) -> bool {
        matches!(self, EdgeKind::TmdbRecommends | EdgeKind::TmdbSimilarTo)
    }

    /// Edges written by the interaction pass rather than by a title row.
    pub fn is_interaction(self) -> bool {
        matches!(
            self,
            EdgeKind::FavoritedBy | EdgeKind::ScoredBy | EdgeKind::WishlistedBy | EdgeKind::WatchedBy
        )
    }

    pub fn allows(self, from: VertexKind, to: VertexKind) -> bool {
        let (froms, tos) = self.endpoints();
        froms.contains(&from) && tos.contains(&to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in VertexKind::ALL {
            assert_eq!(VertexKind::from_name(kind.name()), Some(*kind));
        }
        for kind in EdgeKind::ALL {
            assert_eq!(EdgeKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(VertexKind::from_name("movie"), None);
    }

    #[test]
    fn endpoint_rules() {
        assert!(EdgeKind::HasGenre.allows(VertexKind::Show, VertexKind::Genre));
        assert!(!EdgeKind::HasGenre.allows(VertexKind::Genre, VertexKind::Movie));
        assert!(EdgeKind::NetworkFor.allows(VertexKind::Network, VertexKind::Show));
        assert!(!EdgeKind::NetworkFor.allows(VertexKind::Network, VertexKind::Movie));
        assert!(EdgeKind::TmdbSimilarTo.is_self_edge());
        assert!(!EdgeKind::HasScore.is_self_edge());
        assert!(EdgeKind::WatchedBy.is_interaction());
        assert!(!EdgeKind::TmdbRecommends.is_interaction());
    }

    #[test]
    fn primaries_are_not_satellites() {
        for kind in VertexKind::ALL {
            assert!(!(kind.is_primary() && kind.is_satellite()));
        }
        assert_eq!(VertexKind::ALL.len(), 27);
        assert_eq!(EdgeKind::ALL.len(), 32);
    }
}
