//! The interactive flag registry.
//!
//! Every search option that can be toggled from query mode lives here,
//! keyed by its meta character. Toggling applies the mutual-exclusion
//! groups (context shapes, count vs. list, the depth radio group, the sort
//! radio group) and the registry maps to and from a [`SearchOptions`]
//! snapshot on every re-search.

use crate::search::{SearchOptions, SortKey};

/// One toggleable option.
#[derive(Debug, Clone)]
pub struct QueryFlag {
    /// The meta key that toggles it.
    pub key: char,
    /// Short description shown in the help overlay.
    pub label: &'static str,
    /// Current state.
    pub on: bool,
}

/// Result of a toggle, used to build the status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggled {
    /// Label of the toggled flag.
    pub label: &'static str,
    /// New state.
    pub on: bool,
}

const LABELS: [(char, &str); 46] = [
    ('A', "after context"),
    ('B', "before context"),
    ('b', "byte offset"),
    ('C', "context"),
    ('c', "count lines"),
    ('F', "fixed strings"),
    ('G', "basic regex"),
    ('H', "with filename"),
    ('h', "hide filename"),
    ('I', "ignore binary"),
    ('i', "ignore case"),
    ('j', "smart case"),
    ('k', "column number"),
    ('l', "list files"),
    ('n', "line number"),
    ('o', "only matching"),
    ('P', "perl regex"),
    ('R', "recurse symlinks"),
    ('r', "recurse"),
    ('T', "initial tab"),
    ('U', "binary pattern"),
    ('u', "ungroup matches"),
    ('v', "invert matches"),
    ('W', "with hex binary"),
    ('w', "word match"),
    ('X', "hex binary"),
    ('x', "line match"),
    ('Y', "empty matches"),
    ('y', "any line"),
    ('z', "decompress"),
    ('0', "file name + \\0"),
    ('1', "recurse 1 level"),
    ('2', "recurse 2 levels"),
    ('3', "recurse 3 levels"),
    ('4', "recurse 4 levels"),
    ('5', "recurse 5 levels"),
    ('6', "recurse 6 levels"),
    ('7', "recurse 7 levels"),
    ('8', "recurse 8 levels"),
    ('9', "recurse 9 levels"),
    ('.', "no hidden files"),
    ('+', "with heading"),
    ('#', "sort by size"),
    ('$', "sort by changed"),
    ('@', "sort by created"),
    ('^', "reverse sort"),
];

/// The registry of interactive flags.
#[derive(Debug, Clone)]
pub struct FlagRegistry {
    flags: Vec<QueryFlag>,
    /// Context size restored when a context shape is toggled on.
    context: usize,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagRegistry {
    /// Create a registry with every flag off and a context size of two.
    pub fn new() -> Self {
        Self {
            flags: LABELS
                .iter()
                .map(|&(key, label)| QueryFlag {
                    key,
                    label,
                    on: false,
                })
                .collect(),
            context: 2,
        }
    }

    /// Iterate the flags in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &QueryFlag> {
        self.flags.iter()
    }

    /// State of the flag with the given key.
    pub fn is_on(&self, key: char) -> bool {
        self.flags.iter().any(|f| f.key == key && f.on)
    }

    fn set(&mut self, index: usize, on: bool) {
        self.flags[index].on = on;
    }

    /// Toggle the flag bound to `key`, applying its exclusion group.
    /// Returns `None` when no flag is bound to `key`.
    pub fn toggle(&mut self, key: char) -> Option<Toggled> {
        let index = self.flags.iter().position(|f| f.key == key)?;
        if !self.flags[index].on {
            // Turning on: clear the keys this one excludes.
            match key {
                'A' => self.clear(&[1, 3, 15, 28]),
                'B' => self.clear(&[0, 3, 15, 28]),
                'b' | 'k' | 'n' => self.clear(&[4, 13]),
                'C' => self.clear(&[0, 1, 15, 28]),
                'c' => self.clear(&[2, 12, 13, 14]),
                'H' => self.clear(&[8]),
                'h' => self.clear(&[7]),
                'I' => self.clear(&[23, 25]),
                'i' => self.clear(&[11]),
                'j' => self.clear(&[10]),
                'l' => self.clear(&[2, 4, 12, 14]),
                'o' => self.clear(&[0, 1, 3, 28]),
                'R' => {
                    self.set(18, false);
                    self.clear_depths();
                }
                'r' => {
                    self.set(17, false);
                    self.clear_depths();
                }
                'W' => self.clear(&[9, 25]),
                'w' => self.clear(&[26]),
                'X' => self.clear(&[9, 23]),
                'x' => self.clear(&[24]),
                'y' => self.clear(&[0, 1, 3, 15]),
                '1'..='9' => {
                    self.clear_depths();
                    if !self.flags[17].on && !self.flags[18].on {
                        self.set(17, true);
                    }
                }
                '#' => self.clear(&[43, 44]),
                '$' => self.clear(&[42, 44]),
                '@' => self.clear(&[42, 43]),
                _ => {}
            }
        } else if key == 'R' || key == 'r' {
            // Turning recursion off clears the depth radio group too.
            self.clear_depths();
        }
        self.flags[index].on = !self.flags[index].on;
        Some(Toggled {
            label: self.flags[index].label,
            on: self.flags[index].on,
        })
    }

    fn clear(&mut self, indices: &[usize]) {
        for &i in indices {
            self.flags[i].on = false;
        }
    }

    fn clear_depths(&mut self) {
        for i in 31..=39 {
            self.flags[i].on = false;
        }
    }

    /// Load the registry from an options snapshot.
    pub fn load(&mut self, opts: &SearchOptions) {
        if opts.after_context > 0 {
            self.context = opts.after_context;
        } else if opts.before_context > 0 {
            self.context = opts.before_context;
        }
        let f = &mut self.flags;
        f[0].on = opts.after_context > 0 && opts.before_context == 0;
        f[1].on = opts.after_context == 0 && opts.before_context > 0;
        f[2].on = opts.byte_offset;
        f[3].on = opts.after_context > 0 && opts.before_context > 0;
        f[4].on = opts.count;
        f[5].on = opts.fixed_strings;
        f[6].on = opts.basic_regexp;
        f[7].on = opts.with_filename;
        f[8].on = opts.no_filename;
        f[9].on = opts.binary_without_match;
        f[10].on = opts.ignore_case;
        f[11].on = opts.smart_case;
        f[12].on = opts.column_number;
        f[13].on = opts.files_with_matches;
        f[14].on = opts.line_number;
        f[15].on = opts.only_matching;
        f[16].on = opts.perl_regexp;
        f[17].on = opts.recurse && opts.dereference;
        f[18].on = opts.recurse && !opts.dereference;
        f[19].on = opts.initial_tab;
        f[20].on = opts.binary;
        f[21].on = opts.ungroup;
        f[22].on = opts.invert_match;
        f[23].on = opts.with_hex;
        f[24].on = opts.word_regexp;
        f[25].on = opts.hex;
        f[26].on = opts.line_regexp;
        f[27].on = opts.empty;
        f[28].on = opts.any_line;
        f[29].on = opts.decompress;
        f[30].on = opts.null;
        for depth in 1..=9 {
            f[30 + depth].on = opts.max_depth == depth;
        }
        f[40].on = opts.no_hidden;
        f[41].on = opts.heading;
        // Each sort key pairs with its reverse variant.
        f[42].on = opts.sort == SortKey::Size;
        f[43].on = opts.sort == SortKey::Changed;
        f[44].on = opts.sort == SortKey::Created;
        f[45].on = opts.sort_reverse;
    }

    /// Store the registry into an options snapshot.
    pub fn store(&self, opts: &mut SearchOptions) {
        let f = &self.flags;
        opts.after_context = self.context * usize::from(f[0].on || f[3].on);
        opts.before_context = self.context * usize::from(f[1].on || f[3].on);
        opts.byte_offset = f[2].on;
        opts.count = f[4].on;
        opts.fixed_strings = f[5].on;
        opts.basic_regexp = f[6].on;
        opts.with_filename = f[7].on;
        opts.no_filename = f[8].on;
        opts.binary_without_match = f[9].on;
        opts.ignore_case = f[10].on;
        opts.smart_case = f[11].on;
        opts.column_number = f[12].on;
        opts.files_with_matches = f[13].on;
        opts.line_number = f[14].on;
        opts.only_matching = f[15].on;
        opts.perl_regexp = f[16].on;
        if f[17].on {
            opts.recurse = true;
            opts.dereference = true;
        } else if f[18].on {
            opts.recurse = true;
            opts.dereference = false;
        } else {
            opts.recurse = false;
            opts.dereference = false;
        }
        opts.initial_tab = f[19].on;
        opts.binary = f[20].on;
        opts.ungroup = f[21].on;
        opts.invert_match = f[22].on;
        opts.with_hex = f[23].on;
        opts.word_regexp = f[24].on;
        opts.hex = f[25].on;
        opts.line_regexp = f[26].on;
        opts.empty = f[27].on;
        opts.any_line = f[28].on;
        opts.decompress = f[29].on;
        opts.null = f[30].on;
        opts.max_depth = 0;
        for depth in 1..=9 {
            if f[30 + depth].on {
                opts.max_depth = depth;
            }
        }
        opts.no_hidden = f[40].on;
        opts.heading = f[41].on;
        opts.sort = if f[42].on {
            SortKey::Size
        } else if f[43].on {
            SortKey::Changed
        } else if f[44].on {
            SortKey::Created
        } else {
            SortKey::Name
        };
        opts.sort_reverse = f[45].on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_unknown_key() {
        let mut reg = FlagRegistry::new();
        assert!(reg.toggle('?').is_none());
    }

    #[test]
    fn test_context_shapes_are_exclusive() {
        let mut reg = FlagRegistry::new();
        reg.toggle('A');
        assert!(reg.is_on('A'));
        reg.toggle('B');
        assert!(reg.is_on('B'));
        assert!(!reg.is_on('A'));
        reg.toggle('C');
        assert!(reg.is_on('C'));
        assert!(!reg.is_on('B'));
        reg.toggle('o');
        assert!(!reg.is_on('C'), "only-matching excludes context");
    }

    #[test]
    fn test_depth_radio_group_enables_recursion() {
        let mut reg = FlagRegistry::new();
        reg.toggle('3');
        assert!(reg.is_on('3'));
        assert!(reg.is_on('R'), "depth implies recursion");
        reg.toggle('5');
        assert!(reg.is_on('5'));
        assert!(!reg.is_on('3'));

        // Turning recursion off clears the depth group.
        reg.toggle('R');
        assert!(!reg.is_on('5'));
    }

    #[test]
    fn test_sort_radio_group() {
        let mut reg = FlagRegistry::new();
        reg.toggle('#');
        reg.toggle('$');
        assert!(reg.is_on('$'));
        assert!(!reg.is_on('#'));
        reg.toggle('@');
        assert!(reg.is_on('@'));
        assert!(!reg.is_on('$'));
    }

    #[test]
    fn test_store_and_load_roundtrip() {
        let mut reg = FlagRegistry::new();
        reg.toggle('i');
        reg.toggle('n');
        reg.toggle('C');
        reg.toggle('4');
        reg.toggle('$');
        reg.toggle('^');

        let mut opts = SearchOptions::default();
        reg.store(&mut opts);
        assert!(opts.ignore_case);
        assert!(opts.line_number);
        assert_eq!(opts.after_context, 2);
        assert_eq!(opts.before_context, 2);
        assert_eq!(opts.max_depth, 4);
        assert_eq!(opts.sort, SortKey::Changed);
        assert!(opts.sort_reverse);

        let mut other = FlagRegistry::new();
        other.load(&opts);
        for (a, b) in reg.iter().zip(other.iter()) {
            assert_eq!(a.on, b.on, "flag {} differs after roundtrip", a.key);
        }
    }

    #[test]
    fn test_reverse_sort_pairs_with_each_key() {
        // A reversed changed-sort still lights the changed flag on load.
        let mut opts = SearchOptions::default();
        opts.sort = SortKey::Changed;
        opts.sort_reverse = true;
        let mut reg = FlagRegistry::new();
        reg.load(&opts);
        assert!(reg.is_on('$'));
        assert!(reg.is_on('^'));

        let mut back = SearchOptions::default();
        reg.store(&mut back);
        assert_eq!(back.sort, SortKey::Changed);
        assert!(back.sort_reverse);
    }

    #[test]
    fn test_count_excludes_line_numbers() {
        let mut reg = FlagRegistry::new();
        reg.toggle('n');
        reg.toggle('k');
        reg.toggle('c');
        assert!(reg.is_on('c'));
        assert!(!reg.is_on('n'));
        assert!(!reg.is_on('k'));
        reg.toggle('n');
        assert!(!reg.is_on('c'), "line numbers exclude count");
    }
}
